//! Withdrawal request models and state transitions.

use crate::ledger::models::{page_limit, page_offset, string_enum};
use crate::ledger::{LedgerError, LedgerResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

string_enum! {
    /// Which kind of wallet a withdrawal draws from
    OwnerKind {
        Shop => "shop",
        Customer => "customer",
    }
}

string_enum! {
    /// Withdrawal lifecycle state
    WithdrawalStatus {
        Pending => "pending",
        Approved => "approved",
        Processing => "processing",
        Completed => "completed",
        Failed => "failed",
        Rejected => "rejected",
    }
}

impl WithdrawalStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WithdrawalStatus::Completed | WithdrawalStatus::Failed | WithdrawalStatus::Rejected
        )
    }
}

/// Destination bank account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankAccount {
    pub bank_name: String,
    pub account_number: String,
    pub account_holder: String,
}

impl BankAccount {
    /// Reject blank destination fields
    pub fn validate(&self) -> LedgerResult<()> {
        let missing: Vec<&str> = [
            ("bank_name", &self.bank_name),
            ("account_number", &self.account_number),
            ("account_holder", &self.account_holder),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect();

        if !missing.is_empty() {
            return Err(LedgerError::Validation(format!(
                "missing bank information: {}",
                missing.join(", ")
            )));
        }
        Ok(())
    }

    /// Account number with all but the last four digits hidden
    pub fn masked_account_number(&self) -> String {
        let chars: Vec<char> = self.account_number.chars().collect();
        let visible = chars.len().min(4);
        let hidden = chars.len() - visible;
        let tail: String = chars[hidden..].iter().collect();
        format!("{}{}", "*".repeat(hidden), tail)
    }
}

/// Withdrawal request model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithdrawalRequest {
    pub id: i64,
    pub owner_kind: OwnerKind,
    pub owner_id: i64,
    pub amount: i64,
    pub bank: BankAccount,
    pub status: WithdrawalStatus,
    pub requested_at: DateTime<Utc>,
    pub approved_by: Option<i64>,
    pub approved_at: Option<DateTime<Utc>>,
    pub admin_note: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub transaction_reference: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Withdrawal request before it is persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewWithdrawal {
    pub owner_kind: OwnerKind,
    pub owner_id: i64,
    pub amount: i64,
    pub bank: BankAccount,
}

impl NewWithdrawal {
    pub fn into_request(self, id: i64, now: DateTime<Utc>) -> WithdrawalRequest {
        WithdrawalRequest {
            id,
            owner_kind: self.owner_kind,
            owner_id: self.owner_id,
            amount: self.amount,
            bank: self.bank,
            status: WithdrawalStatus::Pending,
            requested_at: now,
            approved_by: None,
            approved_at: None,
            admin_note: None,
            processed_at: None,
            completed_at: None,
            failure_reason: None,
            transaction_reference: None,
            updated_at: now,
        }
    }
}

/// State change applied to a withdrawal request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WithdrawalTransition {
    Approve { admin_id: i64, note: Option<String> },
    Reject { admin_id: i64, reason: String },
    Cancel { owner_id: i64 },
    StartProcessing,
    Complete { transaction_reference: Option<String> },
    Fail { reason: String },
    /// Transfer outcome unknown; stays Processing until the bank confirms
    Indeterminate { detail: String },
}

/// Reason stored on owner-cancelled requests
pub const CANCELLED_BY_OWNER: &str = "cancelled by owner";

impl WithdrawalTransition {
    /// State the request must be in for this transition
    pub fn required_status(&self) -> WithdrawalStatus {
        match self {
            WithdrawalTransition::Approve { .. }
            | WithdrawalTransition::Reject { .. }
            | WithdrawalTransition::Cancel { .. } => WithdrawalStatus::Pending,
            WithdrawalTransition::StartProcessing => WithdrawalStatus::Approved,
            WithdrawalTransition::Complete { .. }
            | WithdrawalTransition::Fail { .. }
            | WithdrawalTransition::Indeterminate { .. } => WithdrawalStatus::Processing,
        }
    }

    pub fn target_status(&self) -> WithdrawalStatus {
        match self {
            WithdrawalTransition::Approve { .. } => WithdrawalStatus::Approved,
            WithdrawalTransition::Reject { .. } | WithdrawalTransition::Cancel { .. } => {
                WithdrawalStatus::Rejected
            }
            WithdrawalTransition::StartProcessing | WithdrawalTransition::Indeterminate { .. } => {
                WithdrawalStatus::Processing
            }
            WithdrawalTransition::Complete { .. } => WithdrawalStatus::Completed,
            WithdrawalTransition::Fail { .. } => WithdrawalStatus::Failed,
        }
    }
}

impl WithdrawalRequest {
    /// Check that `transition` is legal from the current state
    pub fn check_transition(&self, transition: &WithdrawalTransition) -> LedgerResult<()> {
        let required = transition.required_status();
        if self.status != required {
            return Err(LedgerError::illegal_state(
                "withdrawal",
                self.id,
                self.status,
                required,
            ));
        }
        if let WithdrawalTransition::Cancel { owner_id } = transition {
            if *owner_id != self.owner_id {
                return Err(LedgerError::Validation(format!(
                    "withdrawal {} does not belong to {} {}",
                    self.id, self.owner_kind, owner_id
                )));
            }
        }
        Ok(())
    }

    /// Apply `transition`, validating the current state first
    pub fn apply_transition(
        &mut self,
        transition: &WithdrawalTransition,
        now: DateTime<Utc>,
    ) -> LedgerResult<()> {
        self.check_transition(transition)?;

        match transition {
            WithdrawalTransition::Approve { admin_id, note } => {
                self.approved_by = Some(*admin_id);
                self.approved_at = Some(now);
                self.admin_note = note.clone();
            }
            WithdrawalTransition::Reject { admin_id, reason } => {
                self.approved_by = Some(*admin_id);
                self.admin_note = Some(reason.clone());
                self.failure_reason = Some(reason.clone());
            }
            WithdrawalTransition::Cancel { .. } => {
                self.failure_reason = Some(CANCELLED_BY_OWNER.to_string());
            }
            WithdrawalTransition::StartProcessing => {
                self.processed_at = Some(now);
            }
            WithdrawalTransition::Complete {
                transaction_reference,
            } => {
                self.completed_at = Some(now);
                self.transaction_reference = transaction_reference.clone();
                self.failure_reason = None;
            }
            WithdrawalTransition::Fail { reason } => {
                self.completed_at = Some(now);
                self.failure_reason = Some(reason.clone());
            }
            WithdrawalTransition::Indeterminate { detail } => {
                self.failure_reason = Some(detail.clone());
            }
        }

        self.status = transition.target_status();
        self.updated_at = now;
        Ok(())
    }

    /// Key the bank uses to deduplicate transfers of this request
    pub fn idempotency_key(&self) -> String {
        format!("withdrawal-{}", self.id)
    }
}

/// Filter for withdrawal listings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WithdrawalFilter {
    pub status: Option<WithdrawalStatus>,
    pub owner_kind: Option<OwnerKind>,
    pub owner_id: Option<i64>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl WithdrawalFilter {
    pub fn with_status(status: WithdrawalStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn limit(&self) -> i64 {
        page_limit(self.limit)
    }

    pub fn offset(&self) -> i64 {
        page_offset(self.offset)
    }

    pub fn matches(&self, request: &WithdrawalRequest) -> bool {
        self.status.is_none_or(|s| s == request.status)
            && self.owner_kind.is_none_or(|k| k == request.owner_kind)
            && self.owner_id.is_none_or(|id| id == request.owner_id)
    }
}
