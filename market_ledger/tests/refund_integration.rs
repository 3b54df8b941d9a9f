//! Integration tests for refund distribution.
//!
//! Tests both refund directions, the fee policies, customer shortfall
//! handling and that a failed distribution leaves every wallet as it was.

#![allow(clippy::unreadable_literal)]

use chrono::{Duration, Utc};
use market_ledger::ledger::{EntryType, Reference};
use market_ledger::refund::{RefundFilter, RefundManager, RefundReason, RefundStatus};
use market_ledger::repository::{
    InMemoryLedgerRepository, InMemoryOrderGateway, LedgerRepository, OrderGateway, OrderSnapshot,
    PaymentStatus,
};
use market_ledger::scheduler::BalanceReleaser;
use market_ledger::wallet::{CustomerWalletStore, PlatformWalletStore, ShopWalletStore};
use market_ledger::{LedgerError, RefundPolicy, ShortfallPolicy};
use std::sync::Arc;

const SHOP: i64 = 10;
const CUSTOMER: i64 = 20;

struct Harness {
    repo: Arc<InMemoryLedgerRepository>,
    orders: Arc<InMemoryOrderGateway>,
    refunds: RefundManager,
    releaser: BalanceReleaser,
    shops: ShopWalletStore,
    customers: CustomerWalletStore,
    platform: PlatformWalletStore,
}

fn order(order_id: i64, total: i64, completed_days_ago: i64) -> OrderSnapshot {
    OrderSnapshot {
        order_id,
        shop_id: SHOP,
        customer_id: CUSTOMER,
        total,
        platform_fee_bps: 500,
        payment_status: PaymentStatus::Paid,
        cancelled: false,
        completed_at: Some(Utc::now() - Duration::days(completed_days_ago)),
        balance_released: false,
        refunded_total: 0,
    }
}

/// Order 1 of 1,000,000 completed yesterday, revenue booked
async fn harness(policy: RefundPolicy) -> Harness {
    let repo = Arc::new(InMemoryLedgerRepository::new());
    let orders = Arc::new(InMemoryOrderGateway::new());
    orders.upsert_order(order(1, 1_000_000, 1)).await;

    let h = Harness {
        refunds: RefundManager::new(repo.clone(), orders.clone(), policy),
        releaser: BalanceReleaser::new(repo.clone(), orders.clone()),
        shops: ShopWalletStore::new(repo.clone()),
        customers: CustomerWalletStore::new(repo.clone()),
        platform: PlatformWalletStore::new(repo.clone()),
        repo,
        orders,
    };
    h.releaser.record_order_completion(1).await.unwrap();
    h
}

async fn fund_customer(h: &Harness, amount: i64) {
    h.customers
        .add_balance(CUSTOMER, amount, EntryType::ManualAdjust, Reference::manual(None), "top up")
        .await
        .unwrap();
}

/// Create and approve a refund on order 1, returning its id
async fn refund(h: &Harness, reason: RefundReason, amount: i64) -> Result<i64, LedgerError> {
    let request = h
        .refunds
        .create(1, CUSTOMER, reason, Some("test".to_string()), amount)
        .await
        .unwrap();
    h.refunds.approve(request.id, 1, None).await.map(|r| r.id)
}

#[tokio::test]
async fn test_full_refund_to_customer_keeps_platform_fee() {
    let h = harness(RefundPolicy::default()).await;

    let id = refund(&h, RefundReason::ShopIssue, 1_000_000).await.unwrap();
    let request = h.refunds.get(id).await.unwrap();
    assert_eq!(request.status, RefundStatus::Completed);
    assert!(request.completed_at.is_some());

    let customer = h.customers.get_or_create(CUSTOMER).await.unwrap();
    assert_eq!(customer.balance, 1_000_000);
    assert_eq!(customer.total_refunded, 1_000_000);

    let shop = h.shops.get_or_create(SHOP).await.unwrap();
    assert_eq!(shop.pending_balance, 0);
    assert_eq!(shop.total_refunded, 950_000);

    let platform = h.platform.get_or_create().await.unwrap();
    assert_eq!(platform.balance, 50_000);
    assert_eq!(platform.total_commission_refunded, 0);

    let order = h.orders.get_order(1).await.unwrap();
    assert_eq!(order.refunded_total, 1_000_000);
    assert_eq!(order.payment_status, PaymentStatus::Refunded);
    assert!(!order.cancelled);
}

#[tokio::test]
async fn test_partial_refunds_respect_remainder() {
    let h = harness(RefundPolicy::default()).await;

    refund(&h, RefundReason::ShopIssue, 400_000).await.unwrap();
    let shop = h.shops.get_or_create(SHOP).await.unwrap();
    assert_eq!(shop.pending_balance, 950_000 - 380_000);

    let order = h.orders.get_order(1).await.unwrap();
    assert_eq!(order.payment_status, PaymentStatus::PartiallyRefunded);
    assert_eq!(order.refunded_total, 400_000);

    assert!(matches!(
        h.refunds
            .create(1, CUSTOMER, RefundReason::ShopIssue, None, 600_001)
            .await,
        Err(LedgerError::Validation(_))
    ));
    refund(&h, RefundReason::Other, 600_000).await.unwrap();
    assert_eq!(
        h.orders.get_order(1).await.unwrap().payment_status,
        PaymentStatus::Refunded
    );
    assert!(matches!(
        h.refunds.create(1, CUSTOMER, RefundReason::ShopIssue, None, 1).await,
        Err(LedgerError::Validation(_))
    ));
}

#[tokio::test]
async fn test_two_approved_refunds_cannot_exceed_order_total() {
    let h = harness(RefundPolicy::default()).await;

    // Both fit the remainder when requested
    let first = h
        .refunds
        .create(1, CUSTOMER, RefundReason::ShopIssue, None, 700_000)
        .await
        .unwrap();
    let second = h
        .refunds
        .create(1, CUSTOMER, RefundReason::ShopIssue, None, 700_000)
        .await
        .unwrap();

    h.refunds.approve(first.id, 1, None).await.unwrap();
    assert!(matches!(
        h.refunds.approve(second.id, 1, None).await,
        Err(LedgerError::Validation(msg)) if msg.contains("remainder of 300000")
    ));

    // Refused before any money moved, so it can still be rejected
    assert_eq!(
        h.refunds.get(second.id).await.unwrap().status,
        RefundStatus::Pending
    );
    h.refunds
        .reject(second.id, 1, "exceeds order".to_string())
        .await
        .unwrap();
    assert_eq!(
        h.customers.get_or_create(CUSTOMER).await.unwrap().balance,
        700_000
    );
}

/// Orders gateway that takes its time writing refunds back
struct SlowOrders {
    inner: InMemoryOrderGateway,
}

#[async_trait::async_trait]
impl OrderGateway for SlowOrders {
    async fn get_order(&self, order_id: i64) -> market_ledger::LedgerResult<OrderSnapshot> {
        self.inner.get_order(order_id).await
    }

    async fn matured_orders(
        &self,
        cutoff: chrono::DateTime<Utc>,
        limit: i64,
    ) -> market_ledger::LedgerResult<Vec<OrderSnapshot>> {
        self.inner.matured_orders(cutoff, limit).await
    }

    async fn mark_balance_released(&self, order_id: i64) -> market_ledger::LedgerResult<()> {
        self.inner.mark_balance_released(order_id).await
    }

    async fn record_refund(
        &self,
        order_id: i64,
        refunded_total: i64,
        payment_status: PaymentStatus,
        cancel: bool,
    ) -> market_ledger::LedgerResult<()> {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        self.inner
            .record_refund(order_id, refunded_total, payment_status, cancel)
            .await
    }
}

async fn slow_harness() -> (Arc<InMemoryLedgerRepository>, Arc<SlowOrders>, RefundManager) {
    let repo = Arc::new(InMemoryLedgerRepository::new());
    let orders = Arc::new(SlowOrders {
        inner: InMemoryOrderGateway::new(),
    });
    orders.inner.upsert_order(order(1, 1_000_000, 1)).await;
    BalanceReleaser::new(repo.clone(), orders.clone())
        .record_order_completion(1)
        .await
        .unwrap();
    let refunds = RefundManager::new(repo.clone(), orders.clone(), RefundPolicy::default());
    (repo, orders, refunds)
}

#[tokio::test]
async fn test_concurrent_full_refunds_pay_out_once() {
    let (repo, orders, refunds) = slow_harness().await;
    let a = refunds
        .create(1, CUSTOMER, RefundReason::ShopIssue, None, 1_000_000)
        .await
        .unwrap();
    let b = refunds
        .create(1, CUSTOMER, RefundReason::ShopIssue, None, 1_000_000)
        .await
        .unwrap();

    let (first, second) = tokio::join!(
        refunds.approve(a.id, 1, None),
        refunds.approve(b.id, 2, None)
    );
    let succeeded = [&first, &second].iter().filter(|r| r.is_ok()).count();
    assert_eq!(succeeded, 1);
    assert!([first, second]
        .into_iter()
        .any(|r| matches!(r, Err(LedgerError::Validation(_)))));

    let customer = repo.get_or_create_customer_wallet(CUSTOMER).await.unwrap();
    assert_eq!(customer.balance, 1_000_000);
    assert_eq!(repo.completed_refund_total(1).await.unwrap(), 1_000_000);
    let order = orders.get_order(1).await.unwrap();
    assert_eq!(order.refunded_total, 1_000_000);
    assert_eq!(order.payment_status, PaymentStatus::Refunded);
}

#[tokio::test]
async fn test_concurrent_partial_refunds_add_up_on_order() {
    let (repo, orders, refunds) = slow_harness().await;
    let a = refunds
        .create(1, CUSTOMER, RefundReason::ShopIssue, None, 400_000)
        .await
        .unwrap();
    let b = refunds
        .create(1, CUSTOMER, RefundReason::Other, None, 600_000)
        .await
        .unwrap();

    let (first, second) = tokio::join!(
        refunds.approve(a.id, 1, None),
        refunds.approve(b.id, 2, None)
    );
    assert_eq!(first.unwrap().status, RefundStatus::Completed);
    assert_eq!(second.unwrap().status, RefundStatus::Completed);

    let order = orders.get_order(1).await.unwrap();
    assert_eq!(order.refunded_total, 1_000_000);
    assert_eq!(order.payment_status, PaymentStatus::Refunded);
    let shop = repo.get_or_create_shop_wallet(SHOP).await.unwrap();
    assert_eq!(shop.pending_balance, 0);
}

#[tokio::test]
async fn test_refund_after_release_draws_available_first() {
    let repo = Arc::new(InMemoryLedgerRepository::new());
    let orders = Arc::new(InMemoryOrderGateway::new());
    orders.upsert_order(order(1, 1_000_000, 3)).await;
    let releaser = BalanceReleaser::new(repo.clone(), orders.clone());
    releaser.record_order_completion(1).await.unwrap();
    releaser
        .release_matured(Utc::now() + Duration::days(7), 10)
        .await
        .unwrap();
    assert!(orders.get_order(1).await.unwrap().balance_released);

    let refunds = RefundManager::new(repo.clone(), orders, RefundPolicy::default());
    let request = refunds
        .create(1, CUSTOMER, RefundReason::ShopIssue, None, 200_000)
        .await
        .unwrap();
    refunds.approve(request.id, 1, None).await.unwrap();

    let shop = repo.get_or_create_shop_wallet(SHOP).await.unwrap();
    assert_eq!(shop.available_balance, 950_000 - 190_000);
    assert_eq!(shop.pending_balance, 0);
}

#[tokio::test]
async fn test_platform_can_fund_fee_on_customer_refund() {
    let h = harness(RefundPolicy {
        platform_funds_fee_on_customer_refund: true,
        ..RefundPolicy::default()
    })
    .await;

    refund(&h, RefundReason::ShopCancelled, 1_000_000).await.unwrap();

    let platform = h.platform.get_or_create().await.unwrap();
    assert_eq!(platform.balance, 0);
    assert_eq!(platform.total_commission_refunded, 50_000);
    assert_eq!(
        h.customers.get_or_create(CUSTOMER).await.unwrap().balance,
        1_000_000
    );
}

#[tokio::test]
async fn test_refund_to_shop_takes_from_customer() {
    let h = harness(RefundPolicy::default()).await;
    fund_customer(&h, 800_000).await;

    refund(&h, RefundReason::CustomerCancelled, 500_000)
        .await
        .unwrap();

    let customer = h.customers.get_or_create(CUSTOMER).await.unwrap();
    assert_eq!(customer.balance, 300_000);
    assert_eq!(customer.total_spent, 500_000);

    let shop = h.shops.get_or_create(SHOP).await.unwrap();
    assert_eq!(shop.available_balance, 500_000);
    assert_eq!(shop.pending_balance, 950_000);

    // Commission stays with the platform by default
    assert_eq!(h.platform.get_or_create().await.unwrap().balance, 50_000);

    let order = h.orders.get_order(1).await.unwrap();
    assert!(order.cancelled);
    assert_eq!(order.payment_status, PaymentStatus::PartiallyRefunded);
    assert!(h.refunds.debts(CUSTOMER).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_refund_to_shop_can_reverse_commission() {
    let h = harness(RefundPolicy {
        reverse_commission_on_shop_refund: true,
        ..RefundPolicy::default()
    })
    .await;
    fund_customer(&h, 1_000_000).await;

    refund(&h, RefundReason::FraudulentOrder, 1_000_000)
        .await
        .unwrap();

    let platform = h.platform.get_or_create().await.unwrap();
    assert_eq!(platform.balance, 0);
    assert_eq!(platform.total_commission_refunded, 50_000);
    assert_eq!(
        h.shops.get_or_create(SHOP).await.unwrap().available_balance,
        1_000_000
    );
}

#[tokio::test]
async fn test_customer_shortfall_records_debt() {
    let h = harness(RefundPolicy::default()).await;
    fund_customer(&h, 100_000).await;

    let id = refund(&h, RefundReason::CustomerCancelled, 500_000)
        .await
        .unwrap();
    assert_eq!(
        h.refunds.get(id).await.unwrap().status,
        RefundStatus::Completed
    );

    // Nothing taken from the customer, the whole amount is owed
    let customer = h.customers.get_or_create(CUSTOMER).await.unwrap();
    assert_eq!(customer.balance, 100_000);

    let debts = h.refunds.debts(CUSTOMER).await.unwrap();
    assert_eq!(debts.len(), 1);
    assert_eq!(debts[0].amount, 500_000);
    assert_eq!(debts[0].refund_id, id);
    assert_eq!(debts[0].order_id, 1);

    assert_eq!(
        h.shops.get_or_create(SHOP).await.unwrap().available_balance,
        500_000
    );
}

#[tokio::test]
async fn test_customer_shortfall_can_reject_refund() {
    let h = harness(RefundPolicy {
        shortfall: ShortfallPolicy::Reject,
        ..RefundPolicy::default()
    })
    .await;
    let entries_before = h.repo.all_entries().await.len();

    let request = h
        .refunds
        .create(1, CUSTOMER, RefundReason::CustomerCancelled, None, 500_000)
        .await
        .unwrap();
    let err = h.refunds.approve(request.id, 1, None).await.unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientBalance { .. }));

    let stored = h.refunds.get(request.id).await.unwrap();
    assert_eq!(stored.status, RefundStatus::Failed);
    assert!(stored.failure_reason.unwrap().contains("Insufficient balance"));

    assert_eq!(h.repo.all_entries().await.len(), entries_before);
    assert!(h.refunds.debts(CUSTOMER).await.unwrap().is_empty());
    let order = h.orders.get_order(1).await.unwrap();
    assert_eq!(order.refunded_total, 0);
    assert!(!order.cancelled);
}

#[tokio::test]
async fn test_failed_distribution_reverses_committed_steps() {
    // Shop 11 never booked revenue, so it cannot return its share
    let h = harness(RefundPolicy::default()).await;
    h.orders
        .upsert_order(OrderSnapshot {
            shop_id: 11,
            ..order(2, 300_000, 1)
        })
        .await;

    let request = h
        .refunds
        .create(2, CUSTOMER, RefundReason::ShopIssue, None, 300_000)
        .await
        .unwrap();
    assert!(h.refunds.approve(request.id, 1, None).await.is_err());

    let customer = h.customers.get_or_create(CUSTOMER).await.unwrap();
    assert_eq!(customer.balance, 0);
    assert_eq!(customer.total_refunded, 0);
    assert_eq!(h.orders.get_order(2).await.unwrap().refunded_total, 0);

    let reversals: Vec<_> = h
        .repo
        .all_entries()
        .await
        .into_iter()
        .filter(|e| e.entry_type == EntryType::Reversal)
        .collect();
    assert_eq!(reversals.len(), 1);
    assert_eq!(reversals[0].amount, -300_000);
}

#[tokio::test]
async fn test_completed_refund_cannot_be_approved_again() {
    let h = harness(RefundPolicy::default()).await;
    let id = refund(&h, RefundReason::ShopIssue, 100_000).await.unwrap();
    let entries_before = h.repo.all_entries().await.len();

    assert!(matches!(
        h.refunds.approve(id, 1, None).await,
        Err(LedgerError::IllegalStateTransition { .. })
    ));
    assert!(matches!(
        h.refunds.reject(id, 1, "late".to_string()).await,
        Err(LedgerError::IllegalStateTransition { .. })
    ));
    assert_eq!(h.repo.all_entries().await.len(), entries_before);
}

#[tokio::test]
async fn test_list_refunds_by_status_and_order() {
    let h = harness(RefundPolicy::default()).await;
    let done = refund(&h, RefundReason::ShopIssue, 100_000).await.unwrap();
    let open = h
        .refunds
        .create(1, CUSTOMER, RefundReason::Other, None, 50_000)
        .await
        .unwrap();

    let pending = h
        .refunds
        .list(&RefundFilter {
            status: Some(RefundStatus::Pending),
            ..RefundFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(pending.total, 1);
    assert_eq!(pending.items[0].id, open.id);

    let for_order = h
        .refunds
        .list(&RefundFilter {
            order_id: Some(1),
            ..RefundFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(for_order.total, 2);
    assert!(for_order.items.iter().any(|r| r.id == done));
}
