//! Demo data for the in-memory server.

use std::sync::Arc;

use chrono::{Duration, Utc};
use market_ledger::LedgerResult;
use market_ledger::repository::{
    InMemoryOrderGateway, LedgerRepository, OrderSnapshot, PaymentStatus,
};
use market_ledger::scheduler::BalanceReleaser;
use tracing::info;

pub const DEMO_SHOP_ID: i64 = 1;
pub const DEMO_CUSTOMER_ID: i64 = 1;

/// Seed a few paid orders and book their completion the way the order
/// service would, so the first sweep has matured revenue to release.
///
/// Returns the number of orders seeded.
pub async fn seed_demo_orders(
    repo: Arc<dyn LedgerRepository>,
    orders: Arc<InMemoryOrderGateway>,
) -> LedgerResult<usize> {
    let now = Utc::now();
    let demo = [
        (1, 1_000_000, now - Duration::days(10)),
        (2, 250_000, now - Duration::days(1)),
        (3, 4_000_000, now),
    ];

    let releaser = BalanceReleaser::new(repo, orders.clone());
    for (order_id, total, completed_at) in demo {
        orders
            .upsert_order(OrderSnapshot {
                order_id,
                shop_id: DEMO_SHOP_ID,
                customer_id: DEMO_CUSTOMER_ID,
                total,
                platform_fee_bps: 500,
                payment_status: PaymentStatus::Paid,
                cancelled: false,
                completed_at: Some(completed_at),
                balance_released: false,
                refunded_total: 0,
            })
            .await;
        releaser.record_order_completion(order_id).await?;
    }

    info!(
        "Seeded {} demo orders for shop {} and customer {}",
        demo.len(),
        DEMO_SHOP_ID,
        DEMO_CUSTOMER_ID
    );
    Ok(demo.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use market_ledger::repository::{InMemoryLedgerRepository, OrderGateway};

    #[tokio::test]
    async fn test_seeded_orders_release_only_when_matured() {
        let repo = Arc::new(InMemoryLedgerRepository::new());
        let orders = Arc::new(InMemoryOrderGateway::new());
        assert_eq!(seed_demo_orders(repo.clone(), orders.clone()).await.unwrap(), 3);

        let shop = repo.get_or_create_shop_wallet(DEMO_SHOP_ID).await.unwrap();
        assert_eq!(shop.pending_balance, 950_000 + 237_500 + 3_800_000);

        let report = BalanceReleaser::new(repo.clone(), orders.clone())
            .release_matured(Utc::now(), 100)
            .await
            .unwrap();
        assert_eq!(report.orders, 1);
        assert_eq!(report.amount, 950_000);
        assert_eq!(report.skipped, 0);

        let shop = repo.get_or_create_shop_wallet(DEMO_SHOP_ID).await.unwrap();
        assert_eq!(shop.available_balance, 950_000);
        assert!(orders.get_order(1).await.unwrap().balance_released);
        assert!(!orders.get_order(3).await.unwrap().balance_released);

        let platform = repo.get_or_create_platform_wallet().await.unwrap();
        assert_eq!(platform.total_commission_earned, 50_000 + 12_500 + 200_000);
    }
}
