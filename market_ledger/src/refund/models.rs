//! Refund request models and state transitions.

use crate::ledger::models::{page_limit, page_offset, string_enum};
use crate::ledger::{LedgerError, LedgerResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

string_enum! {
    /// Why a refund was requested
    RefundReason {
        ShopIssue => "shop_issue",
        ShopCancelled => "shop_cancelled",
        CustomerCancelled => "customer_cancelled",
        FraudulentOrder => "fraudulent_order",
        Other => "other",
    }
}

string_enum! {
    /// Party receiving the refunded money
    RefundRecipient {
        Customer => "customer",
        Shop => "shop",
    }
}

string_enum! {
    /// Refund lifecycle state
    RefundStatus {
        Pending => "pending",
        Approved => "approved",
        Rejected => "rejected",
        Processing => "processing",
        Completed => "completed",
        Failed => "failed",
    }
}

impl RefundStatus {
    /// Whether the request's amount counts against the order total
    pub fn holds_order_funds(&self) -> bool {
        matches!(
            self,
            RefundStatus::Approved | RefundStatus::Processing | RefundStatus::Completed
        )
    }
}

impl RefundReason {
    /// Recipient is derived from the reason, never chosen by the requester
    pub fn recipient(&self) -> RefundRecipient {
        match self {
            RefundReason::ShopIssue | RefundReason::ShopCancelled | RefundReason::Other => {
                RefundRecipient::Customer
            }
            RefundReason::CustomerCancelled | RefundReason::FraudulentOrder => {
                RefundRecipient::Shop
            }
        }
    }
}

/// Refund request model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefundRequest {
    pub id: i64,
    pub order_id: i64,
    pub requested_by: i64,
    pub recipient: RefundRecipient,
    pub reason_type: RefundReason,
    pub reason: Option<String>,
    pub refund_amount: i64,
    pub status: RefundStatus,
    pub shop_response: Option<String>,
    pub responded_at: Option<DateTime<Utc>>,
    pub admin_id: Option<i64>,
    pub admin_note: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Refund request before it is persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRefund {
    pub order_id: i64,
    pub requested_by: i64,
    pub reason_type: RefundReason,
    pub reason: Option<String>,
    pub refund_amount: i64,
}

impl NewRefund {
    pub fn into_request(self, id: i64, now: DateTime<Utc>) -> RefundRequest {
        RefundRequest {
            id,
            order_id: self.order_id,
            requested_by: self.requested_by,
            recipient: self.reason_type.recipient(),
            reason_type: self.reason_type,
            reason: self.reason,
            refund_amount: self.refund_amount,
            status: RefundStatus::Pending,
            shop_response: None,
            responded_at: None,
            admin_id: None,
            admin_note: None,
            approved_at: None,
            completed_at: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// State change applied to a refund request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefundTransition {
    /// Shop attaches its side of the story; status unchanged
    ShopRespond { note: String },
    Approve { admin_id: i64, note: Option<String> },
    Reject { admin_id: i64, reason: String },
    StartProcessing,
    Complete,
    Fail { reason: String },
}

impl RefundTransition {
    pub fn required_status(&self) -> RefundStatus {
        match self {
            RefundTransition::ShopRespond { .. }
            | RefundTransition::Approve { .. }
            | RefundTransition::Reject { .. } => RefundStatus::Pending,
            RefundTransition::StartProcessing => RefundStatus::Approved,
            RefundTransition::Complete | RefundTransition::Fail { .. } => RefundStatus::Processing,
        }
    }

    pub fn target_status(&self) -> RefundStatus {
        match self {
            RefundTransition::ShopRespond { .. } => RefundStatus::Pending,
            RefundTransition::Approve { .. } => RefundStatus::Approved,
            RefundTransition::Reject { .. } => RefundStatus::Rejected,
            RefundTransition::StartProcessing => RefundStatus::Processing,
            RefundTransition::Complete => RefundStatus::Completed,
            RefundTransition::Fail { .. } => RefundStatus::Failed,
        }
    }
}

impl RefundRequest {
    /// Apply `transition`, validating the current state first
    pub fn apply_transition(
        &mut self,
        transition: &RefundTransition,
        now: DateTime<Utc>,
    ) -> LedgerResult<()> {
        let required = transition.required_status();
        if self.status != required {
            return Err(LedgerError::illegal_state(
                "refund",
                self.id,
                self.status,
                required,
            ));
        }

        match transition {
            RefundTransition::ShopRespond { note } => {
                self.shop_response = Some(note.clone());
                self.responded_at = Some(now);
            }
            RefundTransition::Approve { admin_id, note } => {
                self.admin_id = Some(*admin_id);
                self.admin_note = note.clone();
                self.approved_at = Some(now);
            }
            RefundTransition::Reject { admin_id, reason } => {
                self.admin_id = Some(*admin_id);
                self.admin_note = Some(reason.clone());
            }
            RefundTransition::StartProcessing => {}
            RefundTransition::Complete => {
                self.completed_at = Some(now);
            }
            RefundTransition::Fail { reason } => {
                self.failure_reason = Some(reason.clone());
            }
        }

        self.status = transition.target_status();
        self.updated_at = now;
        Ok(())
    }
}

/// Check that approving `request` keeps the order's committed refunds
/// within `order_total`. `order_refunds` are every request of the order,
/// read under the same lock the approval is written with.
pub(crate) fn ensure_fits_order(
    request: &RefundRequest,
    order_refunds: &[RefundRequest],
    order_total: i64,
) -> LedgerResult<()> {
    let committed = order_refunds
        .iter()
        .filter(|r| r.id != request.id && r.status.holds_order_funds())
        .try_fold(0i64, |acc, r| {
            acc.checked_add(r.refund_amount)
                .ok_or(LedgerError::BalanceOverflow)
        })?;
    let remainder = order_total.saturating_sub(committed).max(0);

    if request.refund_amount > remainder {
        return Err(LedgerError::Validation(format!(
            "refund of {} exceeds the refundable remainder of {} for order {}",
            request.refund_amount, remainder, request.order_id
        )));
    }
    Ok(())
}

/// Sum of completed refunds among `order_refunds`
pub(crate) fn completed_total(order_refunds: &[RefundRequest]) -> LedgerResult<i64> {
    order_refunds
        .iter()
        .filter(|r| r.status == RefundStatus::Completed)
        .try_fold(0i64, |acc, r| {
            acc.checked_add(r.refund_amount)
                .ok_or(LedgerError::BalanceOverflow)
        })
}

/// Filter for refund listings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefundFilter {
    pub status: Option<RefundStatus>,
    pub order_id: Option<i64>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl RefundFilter {
    pub fn limit(&self) -> i64 {
        page_limit(self.limit)
    }

    pub fn offset(&self) -> i64 {
        page_offset(self.offset)
    }

    pub fn matches(&self, request: &RefundRequest) -> bool {
        self.status.is_none_or(|s| s == request.status)
            && self.order_id.is_none_or(|id| id == request.order_id)
    }
}

/// Amount a customer could not cover during a refund to the shop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerDebt {
    pub id: i64,
    pub customer_id: i64,
    pub refund_id: i64,
    pub order_id: i64,
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

/// Debt record before it is persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCustomerDebt {
    pub customer_id: i64,
    pub refund_id: i64,
    pub order_id: i64,
    pub amount: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recipient_is_derived_from_reason() {
        assert_eq!(RefundReason::ShopIssue.recipient(), RefundRecipient::Customer);
        assert_eq!(RefundReason::ShopCancelled.recipient(), RefundRecipient::Customer);
        assert_eq!(RefundReason::Other.recipient(), RefundRecipient::Customer);
        assert_eq!(RefundReason::CustomerCancelled.recipient(), RefundRecipient::Shop);
        assert_eq!(RefundReason::FraudulentOrder.recipient(), RefundRecipient::Shop);
    }

    #[test]
    fn test_new_refund_starts_pending_with_derived_recipient() {
        let request = NewRefund {
            order_id: 1,
            requested_by: 2,
            reason_type: RefundReason::CustomerCancelled,
            reason: None,
            refund_amount: 100,
        }
        .into_request(5, Utc::now());
        assert_eq!(request.status, RefundStatus::Pending);
        assert_eq!(request.recipient, RefundRecipient::Shop);
    }

    fn request(id: i64, amount: i64, status: RefundStatus) -> RefundRequest {
        let mut request = NewRefund {
            order_id: 1,
            requested_by: 2,
            reason_type: RefundReason::ShopIssue,
            reason: None,
            refund_amount: amount,
        }
        .into_request(id, Utc::now());
        request.status = status;
        request
    }

    #[test]
    fn test_in_flight_refunds_count_against_order() {
        let pending = request(3, 400_000, RefundStatus::Pending);
        let siblings = vec![
            request(1, 300_000, RefundStatus::Completed),
            request(2, 300_000, RefundStatus::Processing),
            request(4, 900_000, RefundStatus::Failed),
            request(5, 900_000, RefundStatus::Rejected),
            pending.clone(),
        ];

        assert!(ensure_fits_order(&pending, &siblings, 1_000_000).is_ok());
        assert!(matches!(
            ensure_fits_order(&pending, &siblings, 999_999),
            Err(LedgerError::Validation(msg)) if msg.contains("remainder of 399999")
        ));
        assert_eq!(completed_total(&siblings).unwrap(), 300_000);
    }

    #[test]
    fn test_shop_response_keeps_pending() {
        let mut request = NewRefund {
            order_id: 1,
            requested_by: 2,
            reason_type: RefundReason::ShopIssue,
            reason: Some("broken".to_string()),
            refund_amount: 100,
        }
        .into_request(5, Utc::now());
        request
            .apply_transition(
                &RefundTransition::ShopRespond {
                    note: "we will replace it".to_string(),
                },
                Utc::now(),
            )
            .unwrap();
        assert_eq!(request.status, RefundStatus::Pending);
        assert!(request.responded_at.is_some());

        request
            .apply_transition(
                &RefundTransition::Reject {
                    admin_id: 1,
                    reason: "replaced".to_string(),
                },
                Utc::now(),
            )
            .unwrap();
        assert_eq!(request.status, RefundStatus::Rejected);
        assert!(request
            .apply_transition(&RefundTransition::StartProcessing, Utc::now())
            .is_err());
    }
}
