//! Shop wallet store.

use super::models::{DrainPolicy, ShopOp, ShopWallet};
use super::mutation::WalletMutation;
use crate::ledger::{
    EntryFilter, EntryType, LedgerEntry, LedgerResult, Page, Reference, WalletKind,
};
use crate::repository::LedgerRepository;
use serde::Serialize;
use std::sync::Arc;

/// Number of recent entries included in a summary
const SUMMARY_ENTRIES: i64 = 10;

/// Credit an order's revenue to the pending bucket
pub fn pending_credit(shop_id: i64, amount: i64, order_id: i64, description: &str) -> WalletMutation {
    WalletMutation::Shop {
        shop_id,
        op: ShopOp::AddPending {
            amount,
            reference: Reference::order(order_id),
            description: description.to_string(),
        },
    }
}

/// Move matured funds from pending to available
pub fn release_transfer(shop_id: i64, amount: i64, order_id: i64) -> WalletMutation {
    WalletMutation::Shop {
        shop_id,
        op: ShopOp::Release {
            amount,
            reference: Reference::order(order_id),
            description: format!("Balance released for order {order_id}"),
        },
    }
}

pub fn debit(
    shop_id: i64,
    amount: i64,
    entry_type: EntryType,
    policy: DrainPolicy,
    reference: Reference,
    description: &str,
) -> WalletMutation {
    WalletMutation::Shop {
        shop_id,
        op: ShopOp::Deduct {
            amount,
            entry_type,
            policy,
            reference,
            description: description.to_string(),
        },
    }
}

pub fn available_credit(
    shop_id: i64,
    amount: i64,
    entry_type: EntryType,
    reference: Reference,
    description: &str,
) -> WalletMutation {
    WalletMutation::Shop {
        shop_id,
        op: ShopOp::AddAvailable {
            amount,
            entry_type,
            reference,
            description: description.to_string(),
        },
    }
}

/// Shop wallet with its most recent activity
#[derive(Debug, Clone, Serialize)]
pub struct ShopWalletSummary {
    #[serde(flatten)]
    pub wallet: ShopWallet,
    pub total_balance: i64,
    pub recent_entries: Vec<LedgerEntry>,
}

/// Shop wallet store
#[derive(Clone)]
pub struct ShopWalletStore {
    repo: Arc<dyn LedgerRepository>,
}

impl ShopWalletStore {
    pub fn new(repo: Arc<dyn LedgerRepository>) -> Self {
        Self { repo }
    }

    async fn apply(&self, mutation: WalletMutation) -> LedgerResult<ShopWallet> {
        let outcome = self.repo.apply_mutation(&mutation).await?;
        log::debug!("Applied {} ({} entries)", mutation, outcome.entries.len());
        outcome.wallet.into_shop()
    }

    /// Get a shop wallet, creating an empty one on first access
    pub async fn get_or_create(&self, shop_id: i64) -> LedgerResult<ShopWallet> {
        self.repo.get_or_create_shop_wallet(shop_id).await
    }

    /// Credit order revenue to the pending bucket
    ///
    /// # Arguments
    ///
    /// * `shop_id` - Shop ID
    /// * `amount` - Shop share of the order, must be positive
    /// * `order_id` - Order the revenue belongs to
    /// * `description` - Entry description
    ///
    /// # Errors
    ///
    /// * `LedgerError::InvalidAmount` - Amount is not positive
    /// * `LedgerError::DuplicateTransaction` - Revenue for this order was already booked
    pub async fn add_pending(
        &self,
        shop_id: i64,
        amount: i64,
        order_id: i64,
        description: &str,
    ) -> LedgerResult<ShopWallet> {
        self.apply(pending_credit(shop_id, amount, order_id, description))
            .await
    }

    /// Move funds from pending to available
    ///
    /// Writes two entries referencing the order: a negative pending entry and
    /// a positive available entry.
    ///
    /// # Errors
    ///
    /// * `LedgerError::InsufficientPendingBalance` - Pending balance below `amount`
    pub async fn release(
        &self,
        shop_id: i64,
        amount: i64,
        order_id: i64,
    ) -> LedgerResult<ShopWallet> {
        self.apply(release_transfer(shop_id, amount, order_id)).await
    }

    /// Debit available first and take any remainder from pending
    ///
    /// # Errors
    ///
    /// * `LedgerError::InsufficientBalance` - Available plus pending below `amount`
    pub async fn deduct(
        &self,
        shop_id: i64,
        amount: i64,
        entry_type: EntryType,
        reference: Reference,
        description: &str,
    ) -> LedgerResult<ShopWallet> {
        self.apply(debit(
            shop_id,
            amount,
            entry_type,
            DrainPolicy::AvailableThenPending,
            reference,
            description,
        ))
        .await
    }

    /// Debit strictly from pending
    pub async fn deduct_pending_only(
        &self,
        shop_id: i64,
        amount: i64,
        entry_type: EntryType,
        reference: Reference,
        description: &str,
    ) -> LedgerResult<ShopWallet> {
        self.apply(debit(
            shop_id,
            amount,
            entry_type,
            DrainPolicy::PendingOnly,
            reference,
            description,
        ))
        .await
    }

    /// Debit strictly from available
    pub async fn deduct_available_only(
        &self,
        shop_id: i64,
        amount: i64,
        entry_type: EntryType,
        reference: Reference,
        description: &str,
    ) -> LedgerResult<ShopWallet> {
        self.apply(debit(
            shop_id,
            amount,
            entry_type,
            DrainPolicy::AvailableOnly,
            reference,
            description,
        ))
        .await
    }

    /// Credit the available bucket directly.
    ///
    /// A `Withdrawal`-typed credit returns a failed withdrawal and lowers
    /// `total_withdrawn`.
    pub async fn add_available(
        &self,
        shop_id: i64,
        amount: i64,
        entry_type: EntryType,
        reference: Reference,
        description: &str,
    ) -> LedgerResult<ShopWallet> {
        self.apply(available_credit(
            shop_id,
            amount,
            entry_type,
            reference,
            description,
        ))
        .await
    }

    pub async fn summary(&self, shop_id: i64) -> LedgerResult<ShopWalletSummary> {
        let wallet = self.get_or_create(shop_id).await?;
        let recent = self
            .entries(&EntryFilter {
                limit: Some(SUMMARY_ENTRIES),
                ..EntryFilter::default()
            }
            .with_wallet(WalletKind::Shop, shop_id))
            .await?;

        Ok(ShopWalletSummary {
            total_balance: wallet.total_balance(),
            wallet,
            recent_entries: recent.items,
        })
    }

    /// Ledger entries matching `filter`
    pub async fn entries(&self, filter: &EntryFilter) -> LedgerResult<Page<LedgerEntry>> {
        self.repo.list_entries(filter).await
    }

    /// History of one shop
    pub async fn history(
        &self,
        shop_id: i64,
        filter: EntryFilter,
    ) -> LedgerResult<Page<LedgerEntry>> {
        self.entries(&filter.with_wallet(WalletKind::Shop, shop_id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{Bucket, LedgerError};
    use crate::repository::InMemoryLedgerRepository;

    fn store() -> ShopWalletStore {
        ShopWalletStore::new(Arc::new(InMemoryLedgerRepository::new()))
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let shops = store();
        let first = shops.get_or_create(5).await.unwrap();
        let second = shops.get_or_create(5).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.total_balance(), 0);
    }

    #[tokio::test]
    async fn test_release_writes_two_entries_for_order() {
        let shops = store();
        shops.add_pending(1, 200_000, 9, "order 9").await.unwrap();
        let wallet = shops.release(1, 200_000, 9).await.unwrap();

        assert_eq!(wallet.pending_balance, 0);
        assert_eq!(wallet.available_balance, 200_000);

        let page = shops
            .history(
                1,
                EntryFilter {
                    entry_type: Some(EntryType::BalanceRelease),
                    ..EntryFilter::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(page.total, 2);
        assert!(page.items.iter().all(|e| e.reference_id == Some(9)));
        let pending: i64 = page
            .items
            .iter()
            .filter(|e| e.bucket == Bucket::Pending)
            .map(|e| e.amount)
            .sum();
        assert_eq!(pending, -200_000);
    }

    #[tokio::test]
    async fn test_release_more_than_pending_fails() {
        let shops = store();
        shops.add_pending(1, 100, 9, "order 9").await.unwrap();
        let err = shops.release(1, 101, 9).await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientPendingBalance {
                pending: 100,
                required: 101,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_summary_includes_recent_entries() {
        let shops = store();
        shops.add_pending(2, 500, 1, "order 1").await.unwrap();
        shops
            .add_available(2, 300, EntryType::ManualAdjust, Reference::manual(None), "bonus")
            .await
            .unwrap();

        let summary = shops.summary(2).await.unwrap();
        assert_eq!(summary.total_balance, 800);
        assert_eq!(summary.recent_entries.len(), 2);
    }
}
