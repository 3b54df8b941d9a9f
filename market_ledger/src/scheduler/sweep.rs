//! Periodic settlement sweep.

use super::release::{BalanceReleaser, ReleaseReport};
use crate::ledger::LedgerResult;
use crate::withdrawal::{WithdrawalBatchReport, WithdrawalManager};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};

/// Result of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub release: ReleaseReport,
    pub withdrawals: WithdrawalBatchReport,
}

/// Runs balance release and withdrawal processing on a fixed interval
pub struct SettlementScheduler {
    releaser: BalanceReleaser,
    withdrawals: WithdrawalManager,
    interval: Duration,
    batch_size: i64,
}

impl SettlementScheduler {
    pub fn new(
        releaser: BalanceReleaser,
        withdrawals: WithdrawalManager,
        interval: Duration,
        batch_size: i64,
    ) -> Self {
        Self {
            releaser,
            withdrawals,
            interval,
            batch_size,
        }
    }

    /// Release matured balances, then settle approved withdrawals
    pub async fn run_once(&self, now: DateTime<Utc>) -> LedgerResult<SweepReport> {
        let release = self.releaser.release_matured(now, self.batch_size).await?;
        let withdrawals = self.withdrawals.process_pending(self.batch_size).await?;
        Ok(SweepReport {
            release,
            withdrawals,
        })
    }

    /// Sweep until `shutdown` flips to true or its sender goes away
    pub async fn run<F>(self, mut shutdown: watch::Receiver<bool>, on_sweep: F)
    where
        F: Fn(&SweepReport) + Send,
    {
        log::info!(
            "Settlement sweep starting (every {:?}, batch {})",
            self.interval,
            self.batch_size
        );

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }

                _ = ticker.tick() => {
                    match self.run_once(Utc::now()).await {
                        Ok(report) => on_sweep(&report),
                        Err(e) => log::error!("Settlement sweep failed: {}", e),
                    }
                }
            }
        }

        log::info!("Settlement sweep stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bank::{SimulatedBank, SimulationMode};
    use crate::repository::{
        InMemoryLedgerRepository, InMemoryOrderGateway, LedgerRepository, OrderSnapshot,
        PaymentStatus,
    };
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn scheduler(
        repo: Arc<InMemoryLedgerRepository>,
        orders: Arc<InMemoryOrderGateway>,
    ) -> SettlementScheduler {
        let bank = Arc::new(SimulatedBank::new(SimulationMode::Approve));
        SettlementScheduler::new(
            BalanceReleaser::new(repo.clone(), orders),
            WithdrawalManager::new(repo, bank, Duration::from_secs(1)),
            Duration::from_millis(10),
            50,
        )
    }

    #[tokio::test]
    async fn test_run_once_releases_matured_order() {
        let repo = Arc::new(InMemoryLedgerRepository::new());
        let orders = Arc::new(InMemoryOrderGateway::new());
        orders
            .upsert_order(OrderSnapshot {
                order_id: 1,
                shop_id: 2,
                customer_id: 3,
                total: 200_000,
                platform_fee_bps: 0,
                payment_status: PaymentStatus::Paid,
                cancelled: false,
                completed_at: Some(Utc::now() - chrono::Duration::days(30)),
                balance_released: false,
                refunded_total: 0,
            })
            .await;

        let scheduler = scheduler(repo.clone(), orders);
        scheduler.releaser.record_order_completion(1).await.unwrap();

        let report = scheduler.run_once(Utc::now()).await.unwrap();
        assert_eq!(report.release.amount, 200_000);
        assert_eq!(report.withdrawals.processed(), 0);

        let shop = repo.get_or_create_shop_wallet(2).await.unwrap();
        assert_eq!(shop.pending_balance, 0);
        assert_eq!(shop.available_balance, 200_000);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let repo = Arc::new(InMemoryLedgerRepository::new());
        let scheduler = scheduler(repo, Arc::new(InMemoryOrderGateway::new()));
        let (tx, rx) = watch::channel(false);
        let sweeps = Arc::new(AtomicUsize::new(0));

        let counter = sweeps.clone();
        let handle = tokio::spawn(scheduler.run(rx, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();

        assert!(sweeps.load(Ordering::SeqCst) >= 1);
    }
}
