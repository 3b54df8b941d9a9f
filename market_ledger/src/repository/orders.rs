//! Orders collaborator: the slice of an order the ledger reads and writes back.

use crate::ledger::models::string_enum;
use crate::ledger::{FeeSplit, LedgerError, LedgerResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use std::collections::BTreeMap;
use tokio::sync::Mutex;

string_enum! {
    /// Payment state of an order
    PaymentStatus {
        Pending => "pending",
        Paid => "paid",
        PartiallyRefunded => "partially_refunded",
        Refunded => "refunded",
        Failed => "failed",
    }
}

impl PaymentStatus {
    /// Whether money was captured and may still be refunded
    pub fn is_refundable(&self) -> bool {
        matches!(self, PaymentStatus::Paid | PaymentStatus::PartiallyRefunded)
    }

    /// Status after the cumulative refunded total reaches `refunded_total`
    pub fn after_refund(order_total: i64, refunded_total: i64) -> Self {
        if refunded_total >= order_total {
            PaymentStatus::Refunded
        } else {
            PaymentStatus::PartiallyRefunded
        }
    }
}

/// Order fields consumed by the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSnapshot {
    pub order_id: i64,
    pub shop_id: i64,
    pub customer_id: i64,
    pub total: i64,
    pub platform_fee_bps: i32,
    pub payment_status: PaymentStatus,
    pub cancelled: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub balance_released: bool,
    pub refunded_total: i64,
}

impl OrderSnapshot {
    /// Split of the full order total
    pub fn fee_split(&self) -> LedgerResult<FeeSplit> {
        FeeSplit::compute(self.total, self.platform_fee_bps)
    }

    /// Amount that can still be refunded
    pub fn refundable_remainder(&self, completed_refunds: i64) -> i64 {
        self.total.saturating_sub(completed_refunds).max(0)
    }
}

/// Access to the external Orders service
#[async_trait]
pub trait OrderGateway: Send + Sync {
    /// Get an order, failing with `NotFound` if it does not exist
    async fn get_order(&self, order_id: i64) -> LedgerResult<OrderSnapshot>;

    /// Orders completed at or before `cutoff` whose shop share is still held
    async fn matured_orders(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> LedgerResult<Vec<OrderSnapshot>>;

    async fn mark_balance_released(&self, order_id: i64) -> LedgerResult<()>;

    /// Write back refund progress.
    ///
    /// The refunded total only ever grows: a total lower than the stored
    /// one leaves total and status alone, so completions reported out of
    /// order cannot undo each other.
    async fn record_refund(
        &self,
        order_id: i64,
        refunded_total: i64,
        payment_status: PaymentStatus,
        cancel: bool,
    ) -> LedgerResult<()>;
}

fn not_found(order_id: i64) -> LedgerError {
    LedgerError::NotFound {
        entity: "order",
        id: order_id,
    }
}

fn is_matured(order: &OrderSnapshot, cutoff: DateTime<Utc>) -> bool {
    !order.balance_released
        && matches!(
            order.payment_status,
            PaymentStatus::Paid | PaymentStatus::PartiallyRefunded | PaymentStatus::Refunded
        )
        && order.completed_at.is_some_and(|at| at <= cutoff)
}

/// In-memory orders for tests and the demo server
#[derive(Default)]
pub struct InMemoryOrderGateway {
    orders: Mutex<BTreeMap<i64, OrderSnapshot>>,
}

impl InMemoryOrderGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an order
    pub async fn upsert_order(&self, order: OrderSnapshot) {
        self.orders.lock().await.insert(order.order_id, order);
    }
}

#[async_trait]
impl OrderGateway for InMemoryOrderGateway {
    async fn get_order(&self, order_id: i64) -> LedgerResult<OrderSnapshot> {
        self.orders
            .lock()
            .await
            .get(&order_id)
            .cloned()
            .ok_or_else(|| not_found(order_id))
    }

    async fn matured_orders(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> LedgerResult<Vec<OrderSnapshot>> {
        let orders = self.orders.lock().await;
        let mut matured: Vec<OrderSnapshot> = orders
            .values()
            .filter(|order| is_matured(order, cutoff))
            .cloned()
            .collect();
        matured.sort_by_key(|order| (order.completed_at, order.order_id));
        matured.truncate(usize::try_from(limit.max(0)).unwrap_or(usize::MAX));
        Ok(matured)
    }

    async fn mark_balance_released(&self, order_id: i64) -> LedgerResult<()> {
        let mut orders = self.orders.lock().await;
        let order = orders.get_mut(&order_id).ok_or_else(|| not_found(order_id))?;
        order.balance_released = true;
        Ok(())
    }

    async fn record_refund(
        &self,
        order_id: i64,
        refunded_total: i64,
        payment_status: PaymentStatus,
        cancel: bool,
    ) -> LedgerResult<()> {
        let mut orders = self.orders.lock().await;
        let order = orders.get_mut(&order_id).ok_or_else(|| not_found(order_id))?;
        if refunded_total >= order.refunded_total {
            order.refunded_total = refunded_total;
            order.payment_status = payment_status;
        }
        order.cancelled |= cancel;
        Ok(())
    }
}

/// PostgreSQL implementation over the order service's `orders` table
pub struct PgOrderGateway {
    pool: PgPool,
}

impl PgOrderGateway {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const ORDER_COLUMNS: &str = "order_id, shop_id, customer_id, total, platform_fee_bps, \
     payment_status, cancelled, completed_at, balance_released, refunded_total";

fn order_from_row(row: &sqlx::postgres::PgRow) -> LedgerResult<OrderSnapshot> {
    Ok(OrderSnapshot {
        order_id: row.get("order_id"),
        shop_id: row.get("shop_id"),
        customer_id: row.get("customer_id"),
        total: row.get("total"),
        platform_fee_bps: row.get("platform_fee_bps"),
        payment_status: row.get::<String, _>("payment_status").parse()?,
        cancelled: row.get("cancelled"),
        completed_at: row.get("completed_at"),
        balance_released: row.get("balance_released"),
        refunded_total: row.get("refunded_total"),
    })
}

#[async_trait]
impl OrderGateway for PgOrderGateway {
    async fn get_order(&self, order_id: i64) -> LedgerResult<OrderSnapshot> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE order_id = $1"
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| not_found(order_id))?;

        order_from_row(&row)
    }

    async fn matured_orders(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> LedgerResult<Vec<OrderSnapshot>> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders
             WHERE balance_released = FALSE
               AND payment_status IN ('paid', 'partially_refunded', 'refunded')
               AND completed_at IS NOT NULL
               AND completed_at <= $1
             ORDER BY completed_at, order_id
             LIMIT $2"
        ))
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(order_from_row).collect()
    }

    async fn mark_balance_released(&self, order_id: i64) -> LedgerResult<()> {
        let result = sqlx::query("UPDATE orders SET balance_released = TRUE WHERE order_id = $1")
            .bind(order_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(not_found(order_id));
        }
        Ok(())
    }

    async fn record_refund(
        &self,
        order_id: i64,
        refunded_total: i64,
        payment_status: PaymentStatus,
        cancel: bool,
    ) -> LedgerResult<()> {
        let result = sqlx::query(
            "UPDATE orders
             SET refunded_total = GREATEST(refunded_total, $2),
                 payment_status = CASE WHEN $2 >= refunded_total THEN $3 ELSE payment_status END,
                 cancelled = cancelled OR $4
             WHERE order_id = $1",
        )
        .bind(order_id)
        .bind(refunded_total)
        .bind(payment_status.as_str())
        .bind(cancel)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(not_found(order_id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn order(order_id: i64, completed_at: Option<DateTime<Utc>>) -> OrderSnapshot {
        OrderSnapshot {
            order_id,
            shop_id: 1,
            customer_id: 2,
            total: 1_000,
            platform_fee_bps: 500,
            payment_status: PaymentStatus::Paid,
            cancelled: false,
            completed_at,
            balance_released: false,
            refunded_total: 0,
        }
    }

    #[test]
    fn test_status_after_refund() {
        assert_eq!(PaymentStatus::after_refund(1_000, 400), PaymentStatus::PartiallyRefunded);
        assert_eq!(PaymentStatus::after_refund(1_000, 1_000), PaymentStatus::Refunded);
        assert!(!PaymentStatus::Refunded.is_refundable());
    }

    #[tokio::test]
    async fn test_matured_orders_respect_cutoff_and_release_flag() {
        let gateway = InMemoryOrderGateway::new();
        let now = Utc::now();
        gateway.upsert_order(order(1, Some(now - Duration::days(10)))).await;
        gateway.upsert_order(order(2, Some(now - Duration::days(1)))).await;
        gateway.upsert_order(order(3, None)).await;

        let matured = gateway.matured_orders(now - Duration::days(7), 10).await.unwrap();
        assert_eq!(matured.len(), 1);
        assert_eq!(matured[0].order_id, 1);

        gateway.mark_balance_released(1).await.unwrap();
        assert!(gateway
            .matured_orders(now - Duration::days(7), 10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_record_refund_keeps_cancel_sticky() {
        let gateway = InMemoryOrderGateway::new();
        gateway.upsert_order(order(1, None)).await;
        gateway
            .record_refund(1, 300, PaymentStatus::PartiallyRefunded, true)
            .await
            .unwrap();
        gateway
            .record_refund(1, 1_000, PaymentStatus::Refunded, false)
            .await
            .unwrap();

        let stored = gateway.get_order(1).await.unwrap();
        assert!(stored.cancelled);
        assert_eq!(stored.refunded_total, 1_000);
        assert_eq!(stored.payment_status, PaymentStatus::Refunded);
        assert!(matches!(
            gateway.get_order(9).await,
            Err(LedgerError::NotFound { entity: "order", id: 9 })
        ));
    }

    #[tokio::test]
    async fn test_record_refund_ignores_stale_total() {
        let gateway = InMemoryOrderGateway::new();
        gateway.upsert_order(order(1, None)).await;
        gateway
            .record_refund(1, 1_000, PaymentStatus::Refunded, false)
            .await
            .unwrap();
        gateway
            .record_refund(1, 400, PaymentStatus::PartiallyRefunded, false)
            .await
            .unwrap();

        let stored = gateway.get_order(1).await.unwrap();
        assert_eq!(stored.refunded_total, 1_000);
        assert_eq!(stored.payment_status, PaymentStatus::Refunded);
    }
}
