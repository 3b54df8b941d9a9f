//! Wallet data models and their balance mutation rules.
//!
//! Every `apply` works on a copy and only replaces `self` once the whole
//! operation succeeded, so a failed mutation leaves the wallet untouched and
//! produces no entries.

use crate::ledger::{
    Bucket, EntryType, LedgerError, LedgerResult, NewLedgerEntry, Reference,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fixed key of the platform wallet row
pub const PLATFORM_WALLET_KEY: &str = "platform";

/// Wallet id used for platform ledger entries
pub const PLATFORM_WALLET_ID: i64 = 0;

/// Shop wallet model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShopWallet {
    pub shop_id: i64,
    pub available_balance: i64,
    pub pending_balance: i64,
    pub total_earned: i64,
    pub total_withdrawn: i64,
    pub total_refunded: i64,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

/// Customer wallet model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerWallet {
    pub customer_id: i64,
    pub balance: i64,
    pub total_refunded: i64,
    pub total_spent: i64,
    pub total_withdrawn: i64,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

/// Platform wallet model (singleton)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformWallet {
    pub balance: i64,
    pub total_commission_earned: i64,
    pub total_commission_refunded: i64,
    pub total_payout: i64,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

/// Which shop buckets a debit may draw from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainPolicy {
    /// Available first, remainder from pending
    AvailableThenPending,
    /// Matured funds only
    AvailableOnly,
    /// Unmatured funds only
    PendingOnly,
}

/// Undo of a previously committed mutation.
///
/// `deltas` are the signed amounts the original mutation applied per bucket;
/// the reversal applies their negation and unwinds the cumulative counters
/// the original `original_type` touched.
#[derive(Debug, Clone, PartialEq)]
pub struct Reversal {
    pub original_type: EntryType,
    pub deltas: Vec<(Bucket, i64)>,
    pub reference: Reference,
    pub description: String,
}

impl Reversal {
    fn total(&self) -> LedgerResult<i64> {
        self.deltas.iter().try_fold(0i64, |acc, (_, amount)| {
            acc.checked_add(*amount).ok_or(LedgerError::BalanceOverflow)
        })
    }
}

/// Shop wallet operations
#[derive(Debug, Clone, PartialEq)]
pub enum ShopOp {
    AddPending {
        amount: i64,
        reference: Reference,
        description: String,
    },
    Release {
        amount: i64,
        reference: Reference,
        description: String,
    },
    Deduct {
        amount: i64,
        entry_type: EntryType,
        policy: DrainPolicy,
        reference: Reference,
        description: String,
    },
    AddAvailable {
        amount: i64,
        entry_type: EntryType,
        reference: Reference,
        description: String,
    },
    Reverse(Reversal),
}

/// Customer wallet operations
#[derive(Debug, Clone, PartialEq)]
pub enum CustomerOp {
    Credit {
        amount: i64,
        entry_type: EntryType,
        reference: Reference,
        description: String,
    },
    Debit {
        amount: i64,
        entry_type: EntryType,
        reference: Reference,
        description: String,
    },
    Reverse(Reversal),
}

/// Platform wallet operations
#[derive(Debug, Clone, PartialEq)]
pub enum PlatformOp {
    /// Signed change with counter side effects chosen by `entry_type`
    Apply {
        amount: i64,
        entry_type: EntryType,
        reference: Reference,
        description: String,
    },
    Reverse(Reversal),
}

fn require_positive(amount: i64) -> LedgerResult<()> {
    if amount <= 0 {
        return Err(LedgerError::InvalidAmount(amount));
    }
    Ok(())
}

fn add_counter(counter: &mut i64, delta: i64) -> LedgerResult<()> {
    *counter = counter
        .checked_add(delta)
        .ok_or(LedgerError::BalanceOverflow)?;
    Ok(())
}

/// Cumulative shop counters moved by one entry type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct ShopCounters {
    earned: i64,
    withdrawn: i64,
    refunded: i64,
}

impl ShopCounters {
    fn effect(entry_type: EntryType, total: i64) -> Self {
        match entry_type {
            EntryType::OrderRevenue => Self {
                earned: total,
                ..Self::default()
            },
            // Debits count up, failure re-credits count back down
            EntryType::Withdrawal => Self {
                withdrawn: -total,
                ..Self::default()
            },
            EntryType::Refund if total < 0 => Self {
                refunded: -total,
                ..Self::default()
            },
            _ => Self::default(),
        }
    }
}

impl ShopWallet {
    pub fn new(shop_id: i64, now: DateTime<Utc>) -> Self {
        Self {
            shop_id,
            available_balance: 0,
            pending_balance: 0,
            total_earned: 0,
            total_withdrawn: 0,
            total_refunded: 0,
            created_at: now,
            last_updated: now,
        }
    }

    /// Available plus pending
    pub fn total_balance(&self) -> i64 {
        self.available_balance.saturating_add(self.pending_balance)
    }

    fn label(&self) -> String {
        format!("shop {} wallet", self.shop_id)
    }

    fn bucket_mut(&mut self, bucket: Bucket) -> LedgerResult<&mut i64> {
        match bucket {
            Bucket::Available => Ok(&mut self.available_balance),
            Bucket::Pending => Ok(&mut self.pending_balance),
            Bucket::Main => Err(LedgerError::Validation(
                "shop wallets have no main bucket".to_string(),
            )),
        }
    }

    fn apply_counters(&mut self, counters: ShopCounters, sign: i64) -> LedgerResult<()> {
        add_counter(&mut self.total_earned, sign * counters.earned)?;
        add_counter(&mut self.total_withdrawn, sign * counters.withdrawn)?;
        add_counter(&mut self.total_refunded, sign * counters.refunded)?;
        Ok(())
    }

    /// Apply an operation, returning one entry per bucket touched
    pub fn apply(&mut self, op: &ShopOp, now: DateTime<Utc>) -> LedgerResult<Vec<NewLedgerEntry>> {
        let mut next = self.clone();
        let entries = next.apply_in_place(op)?;
        next.last_updated = now;
        *self = next;
        Ok(entries)
    }

    fn apply_in_place(&mut self, op: &ShopOp) -> LedgerResult<Vec<NewLedgerEntry>> {
        let mut entries = Vec::with_capacity(2);

        match op {
            ShopOp::AddPending {
                amount,
                reference,
                description,
            } => {
                require_positive(*amount)?;
                entries.push(NewLedgerEntry::record(
                    &mut self.pending_balance,
                    Bucket::Pending,
                    EntryType::OrderRevenue,
                    *amount,
                    *reference,
                    description,
                )?);
                self.apply_counters(ShopCounters::effect(EntryType::OrderRevenue, *amount), 1)?;
            }
            ShopOp::Release {
                amount,
                reference,
                description,
            } => {
                require_positive(*amount)?;
                if self.pending_balance < *amount {
                    return Err(LedgerError::InsufficientPendingBalance {
                        shop_id: self.shop_id,
                        pending: self.pending_balance,
                        required: *amount,
                    });
                }
                entries.push(NewLedgerEntry::record(
                    &mut self.pending_balance,
                    Bucket::Pending,
                    EntryType::BalanceRelease,
                    -amount,
                    *reference,
                    description,
                )?);
                entries.push(NewLedgerEntry::record(
                    &mut self.available_balance,
                    Bucket::Available,
                    EntryType::BalanceRelease,
                    *amount,
                    *reference,
                    description,
                )?);
            }
            ShopOp::Deduct {
                amount,
                entry_type,
                policy,
                reference,
                description,
            } => {
                require_positive(*amount)?;
                let (from_available, from_pending) = self.plan_deduction(*amount, *policy)?;

                if from_available > 0 {
                    entries.push(NewLedgerEntry::record(
                        &mut self.available_balance,
                        Bucket::Available,
                        *entry_type,
                        -from_available,
                        *reference,
                        description,
                    )?);
                }
                if from_pending > 0 {
                    entries.push(NewLedgerEntry::record(
                        &mut self.pending_balance,
                        Bucket::Pending,
                        *entry_type,
                        -from_pending,
                        *reference,
                        description,
                    )?);
                }
                self.apply_counters(ShopCounters::effect(*entry_type, -amount), 1)?;
            }
            ShopOp::AddAvailable {
                amount,
                entry_type,
                reference,
                description,
            } => {
                require_positive(*amount)?;
                entries.push(NewLedgerEntry::record(
                    &mut self.available_balance,
                    Bucket::Available,
                    *entry_type,
                    *amount,
                    *reference,
                    description,
                )?);
                self.apply_counters(ShopCounters::effect(*entry_type, *amount), 1)?;
            }
            ShopOp::Reverse(reversal) => {
                for (bucket, delta) in &reversal.deltas {
                    let label = self.label();
                    let shop_id = self.shop_id;
                    let balance = self.bucket_mut(*bucket)?;
                    if *balance < *delta {
                        return Err(match bucket {
                            Bucket::Pending => LedgerError::InsufficientPendingBalance {
                                shop_id,
                                pending: *balance,
                                required: *delta,
                            },
                            _ => LedgerError::InsufficientBalance {
                                wallet: label,
                                available: *balance,
                                required: *delta,
                            },
                        });
                    }
                    entries.push(NewLedgerEntry::record(
                        balance,
                        *bucket,
                        EntryType::Reversal,
                        -delta,
                        reversal.reference,
                        &reversal.description,
                    )?);
                }
                let total = reversal.total()?;
                self.apply_counters(ShopCounters::effect(reversal.original_type, total), -1)?;
            }
        }

        Ok(entries)
    }

    /// Split a debit across buckets according to `policy`
    fn plan_deduction(&self, amount: i64, policy: DrainPolicy) -> LedgerResult<(i64, i64)> {
        match policy {
            DrainPolicy::PendingOnly => {
                if self.pending_balance < amount {
                    return Err(LedgerError::InsufficientPendingBalance {
                        shop_id: self.shop_id,
                        pending: self.pending_balance,
                        required: amount,
                    });
                }
                Ok((0, amount))
            }
            DrainPolicy::AvailableOnly => {
                if self.available_balance < amount {
                    return Err(LedgerError::InsufficientBalance {
                        wallet: self.label(),
                        available: self.available_balance,
                        required: amount,
                    });
                }
                Ok((amount, 0))
            }
            DrainPolicy::AvailableThenPending => {
                let combined = self
                    .available_balance
                    .checked_add(self.pending_balance)
                    .ok_or(LedgerError::BalanceOverflow)?;
                if combined < amount {
                    return Err(LedgerError::InsufficientBalance {
                        wallet: self.label(),
                        available: combined,
                        required: amount,
                    });
                }
                let from_available = self.available_balance.min(amount);
                Ok((from_available, amount - from_available))
            }
        }
    }
}

/// Cumulative customer counters moved by one entry type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct CustomerCounters {
    refunded: i64,
    spent: i64,
    withdrawn: i64,
}

impl CustomerCounters {
    fn effect(entry_type: EntryType, total: i64) -> Self {
        match entry_type {
            EntryType::Withdrawal => Self {
                withdrawn: -total,
                ..Self::default()
            },
            EntryType::Refund if total > 0 => Self {
                refunded: total,
                ..Self::default()
            },
            EntryType::ManualAdjust | EntryType::Reversal => Self::default(),
            _ if total < 0 => Self {
                spent: -total,
                ..Self::default()
            },
            _ => Self::default(),
        }
    }
}

impl CustomerWallet {
    pub fn new(customer_id: i64, now: DateTime<Utc>) -> Self {
        Self {
            customer_id,
            balance: 0,
            total_refunded: 0,
            total_spent: 0,
            total_withdrawn: 0,
            created_at: now,
            last_updated: now,
        }
    }

    pub fn has_sufficient_balance(&self, amount: i64) -> bool {
        self.balance >= amount
    }

    fn insufficient(&self, required: i64) -> LedgerError {
        LedgerError::InsufficientBalance {
            wallet: format!("customer {} wallet", self.customer_id),
            available: self.balance,
            required,
        }
    }

    fn apply_counters(&mut self, counters: CustomerCounters, sign: i64) -> LedgerResult<()> {
        add_counter(&mut self.total_refunded, sign * counters.refunded)?;
        add_counter(&mut self.total_spent, sign * counters.spent)?;
        add_counter(&mut self.total_withdrawn, sign * counters.withdrawn)?;
        Ok(())
    }

    /// Apply an operation, returning the single entry it wrote
    pub fn apply(
        &mut self,
        op: &CustomerOp,
        now: DateTime<Utc>,
    ) -> LedgerResult<Vec<NewLedgerEntry>> {
        let mut next = self.clone();

        let entry = match op {
            CustomerOp::Credit {
                amount,
                entry_type,
                reference,
                description,
            } => {
                require_positive(*amount)?;
                let entry = NewLedgerEntry::record(
                    &mut next.balance,
                    Bucket::Main,
                    *entry_type,
                    *amount,
                    *reference,
                    description,
                )?;
                next.apply_counters(CustomerCounters::effect(*entry_type, *amount), 1)?;
                entry
            }
            CustomerOp::Debit {
                amount,
                entry_type,
                reference,
                description,
            } => {
                require_positive(*amount)?;
                if !next.has_sufficient_balance(*amount) {
                    return Err(next.insufficient(*amount));
                }
                let entry = NewLedgerEntry::record(
                    &mut next.balance,
                    Bucket::Main,
                    *entry_type,
                    -amount,
                    *reference,
                    description,
                )?;
                next.apply_counters(CustomerCounters::effect(*entry_type, -amount), 1)?;
                entry
            }
            CustomerOp::Reverse(reversal) => {
                let total = reversal.total()?;
                if next.balance < total {
                    return Err(next.insufficient(total));
                }
                let entry = NewLedgerEntry::record(
                    &mut next.balance,
                    Bucket::Main,
                    EntryType::Reversal,
                    -total,
                    reversal.reference,
                    &reversal.description,
                )?;
                next.apply_counters(CustomerCounters::effect(reversal.original_type, total), -1)?;
                entry
            }
        };

        next.last_updated = now;
        *self = next;
        Ok(vec![entry])
    }
}

/// Cumulative platform counters moved by one entry type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct PlatformCounters {
    commission_earned: i64,
    commission_refunded: i64,
    payout: i64,
}

impl PlatformCounters {
    fn effect(entry_type: EntryType, total: i64) -> Self {
        match entry_type {
            EntryType::CommissionIncome => Self {
                commission_earned: total,
                ..Self::default()
            },
            EntryType::CommissionRefund => Self {
                commission_refunded: -total,
                ..Self::default()
            },
            EntryType::PayoutToBank => Self {
                payout: -total,
                ..Self::default()
            },
            _ => Self::default(),
        }
    }
}

impl PlatformWallet {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            balance: 0,
            total_commission_earned: 0,
            total_commission_refunded: 0,
            total_payout: 0,
            created_at: now,
            last_updated: now,
        }
    }

    fn apply_counters(&mut self, counters: PlatformCounters, sign: i64) -> LedgerResult<()> {
        add_counter(&mut self.total_commission_earned, sign * counters.commission_earned)?;
        add_counter(
            &mut self.total_commission_refunded,
            sign * counters.commission_refunded,
        )?;
        add_counter(&mut self.total_payout, sign * counters.payout)?;
        Ok(())
    }

    /// Apply an operation. Debits are never checked against the balance.
    pub fn apply(
        &mut self,
        op: &PlatformOp,
        now: DateTime<Utc>,
    ) -> LedgerResult<Vec<NewLedgerEntry>> {
        let mut next = self.clone();

        let entry = match op {
            PlatformOp::Apply {
                amount,
                entry_type,
                reference,
                description,
            } => {
                if *amount == 0 {
                    return Err(LedgerError::InvalidAmount(0));
                }
                let entry = NewLedgerEntry::record(
                    &mut next.balance,
                    Bucket::Main,
                    *entry_type,
                    *amount,
                    *reference,
                    description,
                )?;
                next.apply_counters(PlatformCounters::effect(*entry_type, *amount), 1)?;
                entry
            }
            PlatformOp::Reverse(reversal) => {
                let total = reversal.total()?;
                let entry = NewLedgerEntry::record(
                    &mut next.balance,
                    Bucket::Main,
                    EntryType::Reversal,
                    -total,
                    reversal.reference,
                    &reversal.description,
                )?;
                next.apply_counters(PlatformCounters::effect(reversal.original_type, total), -1)?;
                entry
            }
        };

        next.last_updated = now;
        *self = next;
        Ok(vec![entry])
    }
}
