//! Ledger primitive: append-only entries shared by every wallet kind.
//!
//! Entries are never written on their own. Each one is produced by a wallet
//! mutation while the wallet row is locked, so `balance_before` and
//! `balance_after` always match the row at that instant.

pub mod errors;
pub mod models;

pub use errors::{LedgerError, LedgerResult};
pub use models::{
    Bucket, EntryFilter, EntryType, FeeSplit, LedgerEntry, NewLedgerEntry, Page, Reference,
    ReferenceType, WalletKind,
};
