//! Order completion credit and pending-to-available release.

use crate::ledger::{LedgerError, LedgerResult};
use crate::refund::Saga;
use crate::repository::{LedgerRepository, OrderGateway, OrderSnapshot, PaymentStatus};
use crate::wallet::{platform, shop};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Money booked when an order completed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OrderCompletion {
    pub order_id: i64,
    pub shop_id: i64,
    pub shop_share: i64,
    pub platform_share: i64,
}

/// Tally of one release pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReleaseReport {
    /// Orders marked released
    pub orders: usize,
    /// Sum moved from pending to available
    pub amount: i64,
    /// Matured orders left alone because their revenue was never booked
    pub skipped: usize,
    pub errors: usize,
}

/// Books order revenue and releases it once it has matured
#[derive(Clone)]
pub struct BalanceReleaser {
    repo: Arc<dyn LedgerRepository>,
    orders: Arc<dyn OrderGateway>,
}

impl BalanceReleaser {
    pub fn new(repo: Arc<dyn LedgerRepository>, orders: Arc<dyn OrderGateway>) -> Self {
        Self { repo, orders }
    }

    /// Credit the shop's pending bucket and book the platform commission
    ///
    /// # Errors
    ///
    /// * `LedgerError::Validation` - Order is not completed or not paid
    /// * `LedgerError::DuplicateTransaction` - Revenue already booked for the order
    /// * `LedgerError::CompensationFailed` - Commission failed and the shop credit could not be undone
    pub async fn record_order_completion(&self, order_id: i64) -> LedgerResult<OrderCompletion> {
        let order = self.orders.get_order(order_id).await?;
        if order.completed_at.is_none() {
            return Err(LedgerError::Validation(format!(
                "order {order_id} is not completed"
            )));
        }
        if order.payment_status != PaymentStatus::Paid {
            return Err(LedgerError::Validation(format!(
                "order {} is {}, expected paid",
                order_id, order.payment_status
            )));
        }

        let split = order.fee_split()?;
        let description = format!("Revenue for order #{order_id}");
        let mut saga = Saga::new(self.repo.as_ref(), format!("order #{order_id} completion"));

        let booked = async {
            if split.shop_share > 0 {
                saga.run(shop::pending_credit(
                    order.shop_id,
                    split.shop_share,
                    order_id,
                    &description,
                ))
                .await?;
            }
            if split.platform_share > 0 {
                saga.run(platform::commission(
                    split.platform_share,
                    order_id,
                    &format!("Commission for order #{order_id}"),
                ))
                .await?;
            }
            Ok::<_, LedgerError>(())
        }
        .await;

        if let Err(e) = booked {
            saga.unwind().await?;
            return Err(e);
        }

        log::info!(
            "Order {} completed: shop {} +{} pending, platform +{}",
            order_id,
            order.shop_id,
            split.shop_share,
            split.platform_share
        );

        Ok(OrderCompletion {
            order_id,
            shop_id: order.shop_id,
            shop_share: split.shop_share,
            platform_share: split.platform_share,
        })
    }

    /// Release every order whose holding window ended by `now`
    pub async fn release_matured(&self, now: DateTime<Utc>, limit: i64) -> LedgerResult<ReleaseReport> {
        let config = self.repo.platform_config().await?;
        let cutoff = now - config.holding_period();
        let matured = self.orders.matured_orders(cutoff, limit).await?;

        let mut report = ReleaseReport::default();
        for order in matured {
            match self.release_order(&order).await {
                Ok(Some(amount)) => {
                    report.orders += 1;
                    report.amount = report.amount.saturating_add(amount);
                }
                Ok(None) => report.skipped += 1,
                Err(e) => {
                    log::error!("Releasing order {} failed: {}", order.order_id, e);
                    report.errors += 1;
                }
            }
        }

        if report.orders > 0 || report.errors > 0 {
            log::info!(
                "Released {} across {} orders ({} errors)",
                report.amount,
                report.orders,
                report.errors
            );
        }
        if report.skipped > 0 {
            log::warn!("{} matured orders have no booked revenue", report.skipped);
        }
        Ok(report)
    }

    /// Release what the order itself still holds in pending.
    ///
    /// Returns `None` when the order's revenue was never booked; such an
    /// order is not marked released so a later completion can still mature.
    async fn release_order(&self, order: &OrderSnapshot) -> LedgerResult<Option<i64>> {
        if order.fee_split()?.shop_share > 0 {
            let holding = self.repo.order_holding(order.shop_id, order.order_id).await?;
            if !holding.revenue_booked {
                log::debug!("Order {} matured without booked revenue", order.order_id);
                return Ok(None);
            }

            // Refunds of other, released orders may have drained the bucket
            let wallet = self.repo.get_or_create_shop_wallet(order.shop_id).await?;
            let amount = holding.pending.min(wallet.pending_balance).max(0);
            if amount > 0 {
                self.repo
                    .apply_mutation(&shop::release_transfer(order.shop_id, amount, order.order_id))
                    .await?;
            }
            self.orders.mark_balance_released(order.order_id).await?;
            return Ok(Some(amount));
        }

        self.orders.mark_balance_released(order.order_id).await?;
        Ok(Some(0))
    }
}
