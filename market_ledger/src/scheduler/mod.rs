//! Balance release and the periodic settlement sweep.
//!
//! Order revenue enters the shop's pending bucket when the order completes.
//! Once the holding window has passed the sweep moves it to available, then
//! drives any approved withdrawals through the bank.

pub mod release;
pub mod sweep;

pub use release::{BalanceReleaser, OrderCompletion, ReleaseReport};
pub use sweep::{SettlementScheduler, SweepReport};
