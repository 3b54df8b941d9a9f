//! # Market Ledger
//!
//! Wallet ledger and settlement engine for a multi-party marketplace.
//!
//! Three kinds of party hold money: shops, customers and the platform itself.
//! Every balance change is recorded as an immutable ledger entry written in
//! the same transaction as the wallet row it changes.
//!
//! ## Money flow
//!
//! - **Order completion**: the shop's share goes to its *pending* bucket, the
//!   platform books its commission
//! - **Release**: after the holding window pending funds become *available*
//! - **Withdrawal**: an approved request debits the wallet, then the bank
//!   transfer runs; an explicit bank refusal puts the money back
//! - **Refund**: routed by reason code to the customer or to the shop
//!
//! ## Core Modules
//!
//! - [`ledger`]: Entry types, references, errors, fee split
//! - [`wallet`]: Wallet models, mutation rules and stores
//! - [`repository`]: Storage seam with PostgreSQL and in-memory backends
//! - [`withdrawal`]: Withdrawal state machine and bank settlement
//! - [`refund`]: Refund distribution engine
//! - [`scheduler`]: Balance release and the settlement sweep
//!
//! ## Example
//!
//! ```
//! use market_ledger::ledger::FeeSplit;
//!
//! let split = FeeSplit::compute(1_000_000, 500).unwrap();
//! assert_eq!(split.shop_share, 950_000);
//! assert_eq!(split.platform_share, 50_000);
//! ```

/// Bank transfer collaborator and its simulated stand-in.
pub mod bank;

/// Platform configuration and engine settings.
pub mod config;

/// Connection pool, migrations and query timeouts.
pub mod db;

/// Ledger entries, errors and shared value types.
pub mod ledger;

pub mod refund;
pub mod repository;
pub mod scheduler;
pub mod wallet;
pub mod withdrawal;

pub use config::{LedgerSettings, PlatformConfig, RefundPolicy, ShortfallPolicy};
pub use ledger::{LedgerError, LedgerResult};
