//! Withdrawal settlement for shop and customer wallets.
//!
//! ```text
//! Pending ──approve──▶ Approved ──batch──▶ Processing ──▶ Completed
//!    │                                         │
//!    └──reject / cancel──▶ Rejected            └──▶ Failed (funds returned)
//! ```

pub mod manager;
pub mod models;

pub use manager::{WithdrawalBatchReport, WithdrawalManager};
pub use models::{
    BankAccount, NewWithdrawal, OwnerKind, WithdrawalFilter, WithdrawalRequest, WithdrawalStatus,
    WithdrawalTransition,
};
