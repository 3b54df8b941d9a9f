//! Wallet mutation commands executed atomically by a repository.

use super::models::{
    CustomerOp, CustomerWallet, PLATFORM_WALLET_ID, PlatformOp, PlatformWallet, Reversal, ShopOp,
    ShopWallet,
};
use crate::ledger::{
    EntryType, LedgerEntry, LedgerError, LedgerResult, NewLedgerEntry, Reference, WalletKind,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// One atomic change to one wallet row
#[derive(Debug, Clone, PartialEq)]
pub enum WalletMutation {
    Shop { shop_id: i64, op: ShopOp },
    Customer { customer_id: i64, op: CustomerOp },
    Platform { op: PlatformOp },
}

/// Wallet state after a mutation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WalletSnapshot {
    Shop(ShopWallet),
    Customer(CustomerWallet),
    Platform(PlatformWallet),
}

/// Result of a committed mutation
#[derive(Debug, Clone, PartialEq)]
pub struct MutationOutcome {
    pub wallet: WalletSnapshot,
    pub entries: Vec<LedgerEntry>,
}

impl WalletMutation {
    pub fn wallet_kind(&self) -> WalletKind {
        match self {
            WalletMutation::Shop { .. } => WalletKind::Shop,
            WalletMutation::Customer { .. } => WalletKind::Customer,
            WalletMutation::Platform { .. } => WalletKind::Platform,
        }
    }

    pub fn wallet_id(&self) -> i64 {
        match self {
            WalletMutation::Shop { shop_id, .. } => *shop_id,
            WalletMutation::Customer { customer_id, .. } => *customer_id,
            WalletMutation::Platform { .. } => PLATFORM_WALLET_ID,
        }
    }

    /// Empty wallet of the kind this mutation targets
    pub fn fresh_wallet(&self, now: DateTime<Utc>) -> WalletSnapshot {
        match self {
            WalletMutation::Shop { shop_id, .. } => {
                WalletSnapshot::Shop(ShopWallet::new(*shop_id, now))
            }
            WalletMutation::Customer { customer_id, .. } => {
                WalletSnapshot::Customer(CustomerWallet::new(*customer_id, now))
            }
            WalletMutation::Platform { .. } => WalletSnapshot::Platform(PlatformWallet::new(now)),
        }
    }

    /// Apply to a locked wallet of the matching kind
    pub fn apply_to(
        &self,
        wallet: &mut WalletSnapshot,
        now: DateTime<Utc>,
    ) -> LedgerResult<Vec<NewLedgerEntry>> {
        match (self, wallet) {
            (WalletMutation::Shop { op, .. }, WalletSnapshot::Shop(w)) => w.apply(op, now),
            (WalletMutation::Customer { op, .. }, WalletSnapshot::Customer(w)) => w.apply(op, now),
            (WalletMutation::Platform { op }, WalletSnapshot::Platform(w)) => w.apply(op, now),
            (mutation, wallet) => Err(LedgerError::Validation(format!(
                "{} mutation applied to {} wallet",
                mutation.wallet_kind(),
                wallet.kind()
            ))),
        }
    }

    /// Order whose revenue this mutation books, if any.
    ///
    /// Each order may be credited as revenue at most once per wallet.
    pub fn order_revenue_reference(&self) -> Option<Reference> {
        match self {
            WalletMutation::Shop {
                op: ShopOp::AddPending { reference, .. },
                ..
            } => Some(*reference),
            WalletMutation::Platform {
                op:
                    PlatformOp::Apply {
                        entry_type: EntryType::CommissionIncome,
                        reference,
                        ..
                    },
            } => Some(*reference),
            _ => None,
        }
    }

    /// Entry type booked by the first entry of this mutation
    pub fn revenue_entry_type(&self) -> EntryType {
        match self {
            WalletMutation::Platform { .. } => EntryType::CommissionIncome,
            _ => EntryType::OrderRevenue,
        }
    }

    /// Mutation that undoes a committed `outcome` of this mutation
    pub fn reversal(&self, outcome: &MutationOutcome, description: &str) -> Option<WalletMutation> {
        let first = outcome.entries.first()?;
        let reversal = Reversal {
            original_type: first.entry_type,
            deltas: outcome
                .entries
                .iter()
                .map(|entry| (entry.bucket, entry.amount))
                .collect(),
            reference: Reference {
                id: first.reference_id,
                kind: first.reference_type,
            },
            description: description.to_string(),
        };

        Some(match self {
            WalletMutation::Shop { shop_id, .. } => WalletMutation::Shop {
                shop_id: *shop_id,
                op: ShopOp::Reverse(reversal),
            },
            WalletMutation::Customer { customer_id, .. } => WalletMutation::Customer {
                customer_id: *customer_id,
                op: CustomerOp::Reverse(reversal),
            },
            WalletMutation::Platform { .. } => WalletMutation::Platform {
                op: PlatformOp::Reverse(reversal),
            },
        })
    }
}

impl std::fmt::Display for WalletMutation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let action = match self {
            WalletMutation::Shop { op, .. } => match op {
                ShopOp::AddPending { .. } => "add_pending",
                ShopOp::Release { .. } => "release",
                ShopOp::Deduct { .. } => "deduct",
                ShopOp::AddAvailable { .. } => "add_available",
                ShopOp::Reverse(_) => "reverse",
            },
            WalletMutation::Customer { op, .. } => match op {
                CustomerOp::Credit { .. } => "credit",
                CustomerOp::Debit { .. } => "debit",
                CustomerOp::Reverse(_) => "reverse",
            },
            WalletMutation::Platform { op } => match op {
                PlatformOp::Apply { .. } => "apply",
                PlatformOp::Reverse(_) => "reverse",
            },
        };
        write!(f, "{} {} {}", self.wallet_kind(), self.wallet_id(), action)
    }
}

impl WalletSnapshot {
    pub fn kind(&self) -> WalletKind {
        match self {
            WalletSnapshot::Shop(_) => WalletKind::Shop,
            WalletSnapshot::Customer(_) => WalletKind::Customer,
            WalletSnapshot::Platform(_) => WalletKind::Platform,
        }
    }

    pub fn into_shop(self) -> LedgerResult<ShopWallet> {
        match self {
            WalletSnapshot::Shop(wallet) => Ok(wallet),
            other => Err(kind_mismatch(WalletKind::Shop, other.kind())),
        }
    }

    pub fn into_customer(self) -> LedgerResult<CustomerWallet> {
        match self {
            WalletSnapshot::Customer(wallet) => Ok(wallet),
            other => Err(kind_mismatch(WalletKind::Customer, other.kind())),
        }
    }

    pub fn into_platform(self) -> LedgerResult<PlatformWallet> {
        match self {
            WalletSnapshot::Platform(wallet) => Ok(wallet),
            other => Err(kind_mismatch(WalletKind::Platform, other.kind())),
        }
    }
}

fn kind_mismatch(expected: WalletKind, got: WalletKind) -> LedgerError {
    LedgerError::Validation(format!("expected {expected} wallet, got {got}"))
}
