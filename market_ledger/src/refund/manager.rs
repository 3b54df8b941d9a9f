//! Refund distribution engine.
//!
//! The reason code decides who receives the money:
//! - refund to customer: the customer gets the full amount back, the shop
//!   gives up its post-commission share and the platform keeps its fee
//! - refund to shop: the shop is made whole including the commission part,
//!   and the customer pays it back if the balance allows
//!
//! Money moves in a saga of single-wallet steps. If any step fails the
//! steps already committed are reversed and the request ends up Failed.

use super::models::{
    CustomerDebt, NewCustomerDebt, NewRefund, RefundFilter, RefundReason, RefundRecipient,
    RefundRequest, RefundTransition,
};
use super::saga::Saga;
use crate::config::{RefundPolicy, ShortfallPolicy};
use crate::ledger::{EntryType, FeeSplit, LedgerError, LedgerResult, Page, Reference};
use crate::repository::{LedgerRepository, OrderGateway, OrderSnapshot, PaymentStatus};
use crate::wallet::{DrainPolicy, customer, platform, shop};
use chrono::Utc;
use std::sync::Arc;

/// Refund manager
#[derive(Clone)]
pub struct RefundManager {
    repo: Arc<dyn LedgerRepository>,
    orders: Arc<dyn OrderGateway>,
    policy: RefundPolicy,
}

impl RefundManager {
    pub fn new(
        repo: Arc<dyn LedgerRepository>,
        orders: Arc<dyn OrderGateway>,
        policy: RefundPolicy,
    ) -> Self {
        Self {
            repo,
            orders,
            policy,
        }
    }

    pub fn policy(&self) -> RefundPolicy {
        self.policy
    }

    /// Check that `amount` still fits in what the order has left to refund
    async fn check_refundable(&self, order: &OrderSnapshot, amount: i64) -> LedgerResult<()> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }
        if !order.payment_status.is_refundable() {
            return Err(LedgerError::Validation(format!(
                "order {} cannot be refunded while {}",
                order.order_id, order.payment_status
            )));
        }

        let completed = self.repo.completed_refund_total(order.order_id).await?;
        let remainder = order.refundable_remainder(completed);
        if amount > remainder {
            return Err(LedgerError::Validation(format!(
                "refund of {} exceeds the refundable remainder of {} for order {}",
                amount, remainder, order.order_id
            )));
        }
        Ok(())
    }

    /// Open a refund request against an order
    ///
    /// # Arguments
    ///
    /// * `order_id` - Order to refund
    /// * `requested_by` - User asking for the refund
    /// * `reason_type` - Reason code, decides the recipient
    /// * `reason` - Free-text explanation
    /// * `amount` - Amount to refund
    ///
    /// # Errors
    ///
    /// * `LedgerError::InvalidAmount` - Amount is not positive
    /// * `LedgerError::Validation` - Order not paid, amount above the remainder, or refund window over
    /// * `LedgerError::NotFound` - Order does not exist
    pub async fn create(
        &self,
        order_id: i64,
        requested_by: i64,
        reason_type: RefundReason,
        reason: Option<String>,
        amount: i64,
    ) -> LedgerResult<RefundRequest> {
        let order = self.orders.get_order(order_id).await?;
        self.check_refundable(&order, amount).await?;

        if let Some(completed_at) = order.completed_at {
            let config = self.repo.platform_config().await?;
            if Utc::now() > completed_at + config.refund_window() {
                return Err(LedgerError::Validation(format!(
                    "refund window of {} days for order {} has passed",
                    config.max_refund_days, order_id
                )));
            }
        }

        let request = self
            .repo
            .insert_refund(NewRefund {
                order_id,
                requested_by,
                reason_type,
                reason,
                refund_amount: amount,
            })
            .await?;

        log::info!(
            "Refund {} requested for order {} ({} to {})",
            request.id,
            order_id,
            amount,
            request.recipient
        );
        Ok(request)
    }

    /// Attach the shop's response to a pending request
    pub async fn respond(&self, id: i64, note: String) -> LedgerResult<RefundRequest> {
        if note.trim().is_empty() {
            return Err(LedgerError::Validation("response cannot be empty".to_string()));
        }
        self.repo
            .transition_refund(id, &RefundTransition::ShopRespond { note })
            .await
    }

    pub async fn reject(&self, id: i64, admin_id: i64, reason: String) -> LedgerResult<RefundRequest> {
        let rejected = self
            .repo
            .transition_refund(id, &RefundTransition::Reject { admin_id, reason })
            .await?;
        log::info!("Refund {} rejected by admin {}", id, admin_id);
        Ok(rejected)
    }

    /// Approve a pending request and distribute the money right away
    ///
    /// The amount is reserved against the order as part of the approval,
    /// so approvals racing on one order can never commit more than its
    /// total between them.
    ///
    /// # Errors
    ///
    /// * `LedgerError::IllegalStateTransition` - Request is not Pending
    /// * `LedgerError::Validation` - Amount no longer fits what the order has left
    /// * Any error from distribution; the request is then Failed and every
    ///   committed wallet step has been reversed
    pub async fn approve(
        &self,
        id: i64,
        admin_id: i64,
        note: Option<String>,
    ) -> LedgerResult<RefundRequest> {
        let request = self.repo.get_refund(id).await?;
        let order = self.orders.get_order(request.order_id).await?;
        self.repo
            .approve_refund(id, order.total, &RefundTransition::Approve { admin_id, note })
            .await?;
        log::info!("Refund {} approved by admin {}", id, admin_id);
        self.process(id).await
    }

    /// Distribute an approved refund
    pub async fn process(&self, id: i64) -> LedgerResult<RefundRequest> {
        let request = self
            .repo
            .transition_refund(id, &RefundTransition::StartProcessing)
            .await?;

        let order = match self.distribute(&request).await {
            Ok(order) => order,
            Err(e) => {
                log::error!("Refund {} failed: {}", id, e);
                self.repo
                    .transition_refund(
                        id,
                        &RefundTransition::Fail {
                            reason: e.to_string(),
                        },
                    )
                    .await?;
                return Err(e);
            }
        };

        let (completed, refunded_total) = self.repo.complete_refund(id).await?;
        log::info!(
            "Refund {} completed: {} to {} for order {}",
            id,
            completed.refund_amount,
            completed.recipient,
            completed.order_id
        );

        let status = PaymentStatus::after_refund(order.total, refunded_total);
        let cancel = completed.recipient == RefundRecipient::Shop;
        if let Err(e) = self
            .orders
            .record_refund(order.order_id, refunded_total, status, cancel)
            .await
        {
            log::error!(
                "Refund {} completed but order {} was not updated: {}",
                id,
                order.order_id,
                e
            );
            return Err(e);
        }
        Ok(completed)
    }

    async fn distribute(&self, request: &RefundRequest) -> LedgerResult<OrderSnapshot> {
        let order = self.orders.get_order(request.order_id).await?;
        let split = FeeSplit::compute(request.refund_amount, order.platform_fee_bps)?;

        let mut saga = Saga::new(self.repo.as_ref(), format!("refund #{}", request.id));

        let moved = match request.recipient {
            RefundRecipient::Customer => self.to_customer(&mut saga, request, &order, split).await,
            RefundRecipient::Shop => self.to_shop(&mut saga, request, &order, split).await,
        };

        let finished = match moved {
            Ok(debt) => self.record_debt(debt).await,
            Err(e) => Err(e),
        };

        if let Err(e) = finished {
            if saga.steps() > 0 {
                saga.unwind().await?;
            }
            return Err(e);
        }
        Ok(order)
    }

    /// Customer gets the full amount, the shop returns its share
    async fn to_customer(
        &self,
        saga: &mut Saga<'_>,
        request: &RefundRequest,
        order: &OrderSnapshot,
        split: FeeSplit,
    ) -> LedgerResult<Option<NewCustomerDebt>> {
        let reference = Reference::refund(request.id);
        let description = format!("Refund #{} for order #{}", request.id, order.order_id);

        saga.run(customer::credit(
            order.customer_id,
            request.refund_amount,
            EntryType::Refund,
            reference,
            &description,
        ))
        .await?;

        if split.shop_share > 0 {
            // Unreleased revenue still sits in pending
            let drain = if order.balance_released {
                DrainPolicy::AvailableThenPending
            } else {
                DrainPolicy::PendingOnly
            };
            saga.run(shop::debit(
                order.shop_id,
                split.shop_share,
                EntryType::Refund,
                drain,
                reference,
                &description,
            ))
            .await?;
        }

        if self.policy.platform_funds_fee_on_customer_refund && split.platform_share > 0 {
            saga.run(platform::commission_refund(
                split.platform_share,
                request.id,
                &description,
            ))
            .await?;
        }

        Ok(None)
    }

    /// Shop gets the full amount, the customer pays it back if possible
    async fn to_shop(
        &self,
        saga: &mut Saga<'_>,
        request: &RefundRequest,
        order: &OrderSnapshot,
        split: FeeSplit,
    ) -> LedgerResult<Option<NewCustomerDebt>> {
        let reference = Reference::refund(request.id);
        let description = format!("Refund #{} for order #{}", request.id, order.order_id);

        let debit = customer::debit(
            order.customer_id,
            request.refund_amount,
            EntryType::Refund,
            reference,
            &description,
        );
        let debt = match saga.run(debit).await {
            Ok(_) => None,
            Err(LedgerError::InsufficientBalance { available, .. }) => match self.policy.shortfall {
                ShortfallPolicy::RecordDebt => {
                    log::warn!(
                        "Customer {} cannot cover refund {} ({} available), recording debt",
                        order.customer_id,
                        request.id,
                        available
                    );
                    Some(NewCustomerDebt {
                        customer_id: order.customer_id,
                        refund_id: request.id,
                        order_id: order.order_id,
                        amount: request.refund_amount,
                    })
                }
                ShortfallPolicy::Reject => {
                    return Err(LedgerError::InsufficientBalance {
                        wallet: format!("customer {} wallet", order.customer_id),
                        available,
                        required: request.refund_amount,
                    });
                }
            },
            Err(e) => return Err(e),
        };

        saga.run(shop::available_credit(
            order.shop_id,
            request.refund_amount,
            EntryType::Refund,
            reference,
            &description,
        ))
        .await?;

        if self.policy.reverse_commission_on_shop_refund && split.platform_share > 0 {
            saga.run(platform::commission_refund(
                split.platform_share,
                request.id,
                &description,
            ))
            .await?;
        }

        Ok(debt)
    }

    async fn record_debt(&self, debt: Option<NewCustomerDebt>) -> LedgerResult<()> {
        if let Some(debt) = debt {
            let debt = self.repo.insert_debt(debt).await?;
            log::info!(
                "Debt {} of {} recorded for customer {}",
                debt.id,
                debt.amount,
                debt.customer_id
            );
        }
        Ok(())
    }

    pub async fn get(&self, id: i64) -> LedgerResult<RefundRequest> {
        self.repo.get_refund(id).await
    }

    pub async fn list(&self, filter: &RefundFilter) -> LedgerResult<Page<RefundRequest>> {
        self.repo.list_refunds(filter).await
    }

    /// Outstanding debts of a customer
    pub async fn debts(&self, customer_id: i64) -> LedgerResult<Vec<CustomerDebt>> {
        self.repo.list_debts(customer_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refund::models::RefundStatus;
    use crate::repository::{InMemoryLedgerRepository, InMemoryOrderGateway};
    use chrono::Duration;

    async fn setup() -> (RefundManager, Arc<InMemoryOrderGateway>) {
        let orders = Arc::new(InMemoryOrderGateway::new());
        orders
            .upsert_order(OrderSnapshot {
                order_id: 1,
                shop_id: 10,
                customer_id: 20,
                total: 1_000_000,
                platform_fee_bps: 500,
                payment_status: PaymentStatus::Paid,
                cancelled: false,
                completed_at: Some(Utc::now() - Duration::days(1)),
                balance_released: false,
                refunded_total: 0,
            })
            .await;
        let manager = RefundManager::new(
            Arc::new(InMemoryLedgerRepository::new()),
            orders.clone(),
            RefundPolicy::default(),
        );
        (manager, orders)
    }

    #[tokio::test]
    async fn test_create_validates_amount_against_order() {
        let (manager, _) = setup().await;
        assert!(matches!(
            manager.create(1, 20, RefundReason::ShopIssue, None, 0).await,
            Err(LedgerError::InvalidAmount(0))
        ));
        assert!(matches!(
            manager.create(1, 20, RefundReason::ShopIssue, None, 1_000_001).await,
            Err(LedgerError::Validation(_))
        ));
        assert!(matches!(
            manager.create(99, 20, RefundReason::ShopIssue, None, 10).await,
            Err(LedgerError::NotFound { entity: "order", .. })
        ));
    }

    #[tokio::test]
    async fn test_create_after_refund_window_fails() {
        let (manager, orders) = setup().await;
        let mut order = orders.get_order(1).await.unwrap();
        order.completed_at = Some(Utc::now() - Duration::days(30));
        orders.upsert_order(order).await;

        let err = manager
            .create(1, 20, RefundReason::ShopIssue, None, 100)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("refund window"));
    }

    #[tokio::test]
    async fn test_unpaid_order_is_not_refundable() {
        let (manager, orders) = setup().await;
        let mut order = orders.get_order(1).await.unwrap();
        order.payment_status = PaymentStatus::Pending;
        orders.upsert_order(order).await;

        assert!(matches!(
            manager.create(1, 20, RefundReason::ShopIssue, None, 100).await,
            Err(LedgerError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_distribution_marks_request_failed() {
        // Shop never received the revenue, so it cannot give its share back
        let (manager, orders) = setup().await;
        let request = manager
            .create(1, 20, RefundReason::ShopIssue, None, 1_000_000)
            .await
            .unwrap();

        let err = manager.approve(request.id, 1, None).await.unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientPendingBalance { .. }));

        let stored = manager.get(request.id).await.unwrap();
        assert_eq!(stored.status, RefundStatus::Failed);
        assert!(stored.failure_reason.is_some());

        let order = orders.get_order(1).await.unwrap();
        assert_eq!(order.refunded_total, 0);
        assert_eq!(order.payment_status, PaymentStatus::Paid);
    }

    #[tokio::test]
    async fn test_shop_response_then_reject() {
        let (manager, _) = setup().await;
        let request = manager
            .create(1, 20, RefundReason::ShopIssue, Some("scratched".into()), 100)
            .await
            .unwrap();
        manager
            .respond(request.id, "photo shows no damage".to_string())
            .await
            .unwrap();
        let rejected = manager
            .reject(request.id, 3, "no evidence".to_string())
            .await
            .unwrap();
        assert_eq!(rejected.status, RefundStatus::Rejected);
        assert_eq!(rejected.shop_response.as_deref(), Some("photo shows no damage"));
    }
}
