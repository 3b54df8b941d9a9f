//! Storage seams for the ledger.
//!
//! `LedgerRepository` is the only way wallets, entries and requests are
//! written. Each method is atomic: either everything it describes commits,
//! or nothing does.

use async_trait::async_trait;

use crate::config::PlatformConfig;
use crate::ledger::{EntryFilter, EntryType, LedgerEntry, LedgerError, LedgerResult, Page};
use crate::refund::models::{
    CustomerDebt, NewCustomerDebt, NewRefund, RefundFilter, RefundRequest, RefundTransition,
};
use crate::wallet::models::{CustomerWallet, PlatformWallet, ShopWallet};
use crate::wallet::mutation::{MutationOutcome, WalletMutation};
use crate::withdrawal::models::{
    NewWithdrawal, WithdrawalFilter, WithdrawalRequest, WithdrawalTransition,
};

pub mod memory;
pub mod orders;
pub mod postgres;

pub use memory::InMemoryLedgerRepository;
pub use orders::{InMemoryOrderGateway, OrderGateway, OrderSnapshot, PaymentStatus, PgOrderGateway};
pub use postgres::PgLedgerRepository;

/// What an order still holds in its shop's pending bucket
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrderHolding {
    /// Revenue for the order is on the books and was not compensated
    pub revenue_booked: bool,
    /// Net of the order's revenue, releases and refund debits on pending
    pub pending: i64,
}

/// Trait for ledger storage operations
#[async_trait]
pub trait LedgerRepository: Send + Sync {
    /// Current platform configuration
    async fn platform_config(&self) -> LedgerResult<PlatformConfig>;

    /// Replace the platform configuration
    async fn update_platform_config(&self, config: &PlatformConfig)
    -> LedgerResult<PlatformConfig>;

    async fn get_or_create_shop_wallet(&self, shop_id: i64) -> LedgerResult<ShopWallet>;

    async fn get_or_create_customer_wallet(&self, customer_id: i64)
    -> LedgerResult<CustomerWallet>;

    async fn get_or_create_platform_wallet(&self) -> LedgerResult<PlatformWallet>;

    /// Lock the target wallet, apply the mutation and append its entries
    async fn apply_mutation(&self, mutation: &WalletMutation) -> LedgerResult<MutationOutcome>;

    /// Entries matching `filter`, newest first
    async fn list_entries(&self, filter: &EntryFilter) -> LedgerResult<Page<LedgerEntry>>;

    async fn insert_withdrawal(&self, request: NewWithdrawal) -> LedgerResult<WithdrawalRequest>;

    async fn get_withdrawal(&self, id: i64) -> LedgerResult<WithdrawalRequest>;

    async fn list_withdrawals(
        &self,
        filter: &WithdrawalFilter,
    ) -> LedgerResult<Page<WithdrawalRequest>>;

    /// Move a withdrawal to its next state.
    ///
    /// The request row is locked and its status checked before `mutation`
    /// is applied; both commit together.
    async fn transition_withdrawal(
        &self,
        id: i64,
        transition: &WithdrawalTransition,
        mutation: Option<&WalletMutation>,
    ) -> LedgerResult<WithdrawalRequest>;

    async fn insert_refund(&self, request: NewRefund) -> LedgerResult<RefundRequest>;

    async fn get_refund(&self, id: i64) -> LedgerResult<RefundRequest>;

    async fn list_refunds(&self, filter: &RefundFilter) -> LedgerResult<Page<RefundRequest>>;

    async fn transition_refund(
        &self,
        id: i64,
        transition: &RefundTransition,
    ) -> LedgerResult<RefundRequest>;

    /// Approve a pending refund, reserving its amount against the order.
    ///
    /// Every refund row of the order is locked first, so two approvals of
    /// the same order serialize. Approved, processing and completed
    /// amounts plus this one must stay within `order_total`.
    async fn approve_refund(
        &self,
        id: i64,
        order_total: i64,
        transition: &RefundTransition,
    ) -> LedgerResult<RefundRequest>;

    /// Complete a processing refund and return it with the order's
    /// completed refund total, read under the same lock
    async fn complete_refund(&self, id: i64) -> LedgerResult<(RefundRequest, i64)>;

    /// Sum of completed refunds for an order
    async fn completed_refund_total(&self, order_id: i64) -> LedgerResult<i64>;

    /// Pending money an order has on its shop's wallet
    async fn order_holding(&self, shop_id: i64, order_id: i64) -> LedgerResult<OrderHolding>;

    async fn insert_debt(&self, debt: NewCustomerDebt) -> LedgerResult<CustomerDebt>;

    async fn list_debts(&self, customer_id: i64) -> LedgerResult<Vec<CustomerDebt>>;
}

/// Reject a second revenue credit for the same order on one wallet.
///
/// `booked` counts revenue entries already written for the order and
/// `reversed` counts reversal entries carrying the same reference, so a
/// credit undone by compensation may be booked again.
pub(crate) fn ensure_not_duplicate(
    mutation: &WalletMutation,
    order_id: Option<i64>,
    booked: i64,
    reversed: i64,
) -> LedgerResult<()> {
    if booked > reversed {
        let entry_type: EntryType = mutation.revenue_entry_type();
        return Err(LedgerError::DuplicateTransaction(format!(
            "{} already booked for order {} on {} {}",
            entry_type,
            order_id.map_or_else(|| "-".to_string(), |id| id.to_string()),
            mutation.wallet_kind(),
            mutation.wallet_id()
        )));
    }
    Ok(())
}
