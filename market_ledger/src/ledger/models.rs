//! Ledger entry models shared by every wallet kind.

use super::errors::{LedgerError, LedgerResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Declares a fieldless enum stored as a snake_case string column.
macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            /// Column representation
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::ledger::LedgerError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err($crate::ledger::LedgerError::Validation(format!(
                        "unknown {} '{}'",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

pub(crate) use string_enum;

string_enum! {
    /// Which party a wallet belongs to
    WalletKind {
        Shop => "shop",
        Customer => "customer",
        Platform => "platform",
    }
}

string_enum! {
    /// Balance bucket touched by an entry. Single-bucket wallets use `Main`.
    Bucket {
        Pending => "pending",
        Available => "available",
        Main => "main",
    }
}

string_enum! {
    /// Entry type
    EntryType {
        OrderRevenue => "order_revenue",
        BalanceRelease => "balance_release",
        Withdrawal => "withdrawal",
        Refund => "refund",
        CommissionIncome => "commission_income",
        CommissionRefund => "commission_refund",
        PayoutToBank => "payout_to_bank",
        ManualAdjust => "manual_adjust",
        Reversal => "reversal",
    }
}

string_enum! {
    /// What caused an entry
    ReferenceType {
        Order => "order",
        RefundRequest => "refund_request",
        WithdrawalRequest => "withdrawal_request",
        Manual => "manual",
    }
}

/// Link from an entry back to the record that caused it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub id: Option<i64>,
    pub kind: ReferenceType,
}

impl Reference {
    pub fn order(order_id: i64) -> Self {
        Self {
            id: Some(order_id),
            kind: ReferenceType::Order,
        }
    }

    pub fn refund(refund_id: i64) -> Self {
        Self {
            id: Some(refund_id),
            kind: ReferenceType::RefundRequest,
        }
    }

    pub fn withdrawal(withdrawal_id: i64) -> Self {
        Self {
            id: Some(withdrawal_id),
            kind: ReferenceType::WithdrawalRequest,
        }
    }

    pub fn manual(id: Option<i64>) -> Self {
        Self {
            id,
            kind: ReferenceType::Manual,
        }
    }
}

/// Ledger entry (immutable, append-only)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: i64,
    pub wallet_kind: WalletKind,
    pub wallet_id: i64,
    pub entry_type: EntryType,
    pub bucket: Bucket,
    pub amount: i64,
    pub balance_before: i64,
    pub balance_after: i64,
    pub reference_id: Option<i64>,
    pub reference_type: ReferenceType,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// Entry produced by a wallet mutation before it is persisted.
///
/// `balance_before`/`balance_after` are taken from the locked wallet row, so a
/// draft is only meaningful inside the transaction that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct NewLedgerEntry {
    pub entry_type: EntryType,
    pub bucket: Bucket,
    pub amount: i64,
    pub balance_before: i64,
    pub balance_after: i64,
    pub reference: Reference,
    pub description: String,
}

impl NewLedgerEntry {
    /// Record one signed change against a bucket, moving `balance` in place.
    ///
    /// Callers validate the amount beforehand; this only guards overflow.
    pub fn record(
        balance: &mut i64,
        bucket: Bucket,
        entry_type: EntryType,
        amount: i64,
        reference: Reference,
        description: &str,
    ) -> LedgerResult<Self> {
        let before = *balance;
        let after = before
            .checked_add(amount)
            .ok_or(LedgerError::BalanceOverflow)?;
        *balance = after;

        Ok(Self {
            entry_type,
            bucket,
            amount,
            balance_before: before,
            balance_after: after,
            reference,
            description: description.to_string(),
        })
    }

    /// Attach wallet identity, id and timestamp
    pub fn into_entry(
        self,
        id: i64,
        wallet_kind: WalletKind,
        wallet_id: i64,
        created_at: DateTime<Utc>,
    ) -> LedgerEntry {
        LedgerEntry {
            id,
            wallet_kind,
            wallet_id,
            entry_type: self.entry_type,
            bucket: self.bucket,
            amount: self.amount,
            balance_before: self.balance_before,
            balance_after: self.balance_after,
            reference_id: self.reference.id,
            reference_type: self.reference.kind,
            description: self.description,
            created_at,
        }
    }
}

/// Filter for ledger listings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntryFilter {
    pub wallet_kind: Option<WalletKind>,
    pub wallet_id: Option<i64>,
    pub entry_type: Option<EntryType>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Default page size for listings
pub const DEFAULT_PAGE_SIZE: i64 = 50;

/// Largest page a caller may request
pub const MAX_PAGE_SIZE: i64 = 500;

/// Requested page size clamped to `1..=MAX_PAGE_SIZE`
pub fn page_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
}

pub fn page_offset(offset: Option<i64>) -> i64 {
    offset.unwrap_or(0).max(0)
}

impl EntryFilter {
    /// Entries of one wallet
    pub fn for_wallet(kind: WalletKind, wallet_id: i64) -> Self {
        Self {
            wallet_kind: Some(kind),
            wallet_id: Some(wallet_id),
            ..Default::default()
        }
    }

    /// Narrow this filter to one wallet
    pub fn with_wallet(mut self, kind: WalletKind, wallet_id: i64) -> Self {
        self.wallet_kind = Some(kind);
        self.wallet_id = Some(wallet_id);
        self
    }

    pub fn limit(&self) -> i64 {
        page_limit(self.limit)
    }

    pub fn offset(&self) -> i64 {
        page_offset(self.offset)
    }

    /// Whether an entry passes every filter criterion
    pub fn matches(&self, entry: &LedgerEntry) -> bool {
        self.wallet_kind.is_none_or(|k| k == entry.wallet_kind)
            && self.wallet_id.is_none_or(|id| id == entry.wallet_id)
            && self.entry_type.is_none_or(|t| t == entry.entry_type)
            && self.from.is_none_or(|from| entry.created_at >= from)
            && self.to.is_none_or(|to| entry.created_at < to)
    }
}

/// One page of a listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// Split of an amount between the shop and the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSplit {
    pub shop_share: i64,
    pub platform_share: i64,
}

/// Basis points in one whole
pub const BPS_DENOMINATOR: i64 = 10_000;

impl FeeSplit {
    /// Split `amount` at `fee_bps` (500 = 5%). Shares always sum to `amount`.
    pub fn compute(amount: i64, fee_bps: i32) -> LedgerResult<Self> {
        if !(0..=BPS_DENOMINATOR as i32).contains(&fee_bps) {
            return Err(LedgerError::Validation(format!(
                "platform fee must be between 0 and {BPS_DENOMINATOR} bps, got {fee_bps}"
            )));
        }

        let scaled = (amount as i128) * (fee_bps as i128);
        let denominator = BPS_DENOMINATOR as i128;
        // Round half up
        let platform_share = (scaled + denominator / 2) / denominator;
        let platform_share =
            i64::try_from(platform_share).map_err(|_| LedgerError::BalanceOverflow)?;

        Ok(Self {
            shop_share: amount - platform_share,
            platform_share,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_entry_type_round_trips_through_column_text() {
        for t in [
            EntryType::OrderRevenue,
            EntryType::BalanceRelease,
            EntryType::CommissionRefund,
            EntryType::Reversal,
        ] {
            assert_eq!(EntryType::from_str(t.as_str()).unwrap(), t);
        }
        assert!(EntryType::from_str("bonus").is_err());
    }

    #[test]
    fn test_json_names_match_column_text() {
        for t in [
            EntryType::OrderRevenue,
            EntryType::PayoutToBank,
            EntryType::ManualAdjust,
        ] {
            assert_eq!(serde_json::to_value(t).unwrap(), t.as_str());
        }
        assert_eq!(
            serde_json::to_value(ReferenceType::WithdrawalRequest).unwrap(),
            "withdrawal_request"
        );
        let kind: WalletKind = serde_json::from_str("\"customer\"").unwrap();
        assert_eq!(kind, WalletKind::Customer);
    }

    #[test]
    fn test_record_moves_balance() {
        let mut balance = 100;
        let entry = NewLedgerEntry::record(
            &mut balance,
            Bucket::Main,
            EntryType::Refund,
            -40,
            Reference::refund(3),
            "refund",
        )
        .unwrap();
        assert_eq!(balance, 60);
        assert_eq!(entry.balance_before, 100);
        assert_eq!(entry.balance_after, 60);
        assert_eq!(entry.reference.id, Some(3));
    }

    #[test]
    fn test_record_overflow() {
        let mut balance = i64::MAX;
        let result = NewLedgerEntry::record(
            &mut balance,
            Bucket::Main,
            EntryType::ManualAdjust,
            1,
            Reference::manual(None),
            "",
        );
        assert!(matches!(result, Err(LedgerError::BalanceOverflow)));
        assert_eq!(balance, i64::MAX);
    }

    #[test]
    fn test_fee_split_five_percent() {
        let split = FeeSplit::compute(1_000_000, 500).unwrap();
        assert_eq!(split.platform_share, 50_000);
        assert_eq!(split.shop_share, 950_000);
    }

    #[test]
    fn test_fee_split_rounds_half_up_and_conserves() {
        // 2.5% of 333 = 8.325 -> 8
        let split = FeeSplit::compute(333, 250).unwrap();
        assert_eq!(split.platform_share, 8);
        assert_eq!(split.shop_share + split.platform_share, 333);

        // 5% of 10 = 0.5 -> 1
        let split = FeeSplit::compute(10, 500).unwrap();
        assert_eq!(split.platform_share, 1);
        assert_eq!(split.shop_share, 9);
    }

    #[test]
    fn test_fee_split_rejects_out_of_range_rate() {
        assert!(FeeSplit::compute(100, -1).is_err());
        assert!(FeeSplit::compute(100, 10_001).is_err());
    }

    #[test]
    fn test_filter_limits_are_clamped() {
        let filter = EntryFilter {
            limit: Some(10_000),
            offset: Some(-5),
            ..Default::default()
        };
        assert_eq!(filter.limit(), MAX_PAGE_SIZE);
        assert_eq!(filter.offset(), 0);
        assert_eq!(EntryFilter::default().limit(), DEFAULT_PAGE_SIZE);
    }
}
