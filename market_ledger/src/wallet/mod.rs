//! Wallets for the three parties that hold money on the marketplace.
//!
//! This module implements:
//! - Two-bucket shop wallets (pending until the holding period ends, then available)
//! - Single-bucket customer wallets
//! - The platform wallet singleton with commission and payout counters
//! - One ledger entry per bucket touched by every mutation
//!
//! ## Example
//!
//! ```no_run
//! use market_ledger::repository::InMemoryLedgerRepository;
//! use market_ledger::wallet::ShopWalletStore;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let shops = ShopWalletStore::new(Arc::new(InMemoryLedgerRepository::new()));
//!
//!     shops.add_pending(1, 950_000, 42, "order 42 completed").await?;
//!     let wallet = shops.release(1, 950_000, 42).await?;
//!     println!("available: {}", wallet.available_balance);
//!
//!     Ok(())
//! }
//! ```

pub mod customer;
pub mod models;
pub mod mutation;
pub mod platform;
pub mod shop;

pub use customer::CustomerWalletStore;
pub use models::{
    CustomerOp, CustomerWallet, DrainPolicy, PLATFORM_WALLET_ID, PLATFORM_WALLET_KEY, PlatformOp,
    PlatformWallet, Reversal, ShopOp, ShopWallet,
};
pub use mutation::{MutationOutcome, WalletMutation, WalletSnapshot};
pub use platform::PlatformWalletStore;
pub use shop::{ShopWalletStore, ShopWalletSummary};
