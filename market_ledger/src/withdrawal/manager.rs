//! Withdrawal settlement.
//!
//! Approval debits the wallet in the same transaction that moves the request
//! out of Pending, so a request can be paid for at most once. The transfer
//! itself happens later in a batch: the request is committed as Processing
//! before the bank is called, and only an explicit refusal from the bank
//! returns the money to the wallet.

use super::models::{
    BankAccount, NewWithdrawal, OwnerKind, WithdrawalFilter, WithdrawalRequest, WithdrawalStatus,
    WithdrawalTransition,
};
use crate::bank::{BankTransfer, TransferError, TransferInstruction, TransferOutcome, TransferReceipt};
use crate::ledger::{EntryType, LedgerError, LedgerResult, Page, Reference};
use crate::repository::LedgerRepository;
use crate::wallet::{DrainPolicy, WalletMutation, customer, shop};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Tally of one processing batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WithdrawalBatchReport {
    pub completed: usize,
    pub failed: usize,
    /// Still Processing because the bank outcome is unknown
    pub in_doubt: usize,
    /// Items skipped because of a ledger error
    pub errors: usize,
}

impl WithdrawalBatchReport {
    fn record(&mut self, status: WithdrawalStatus) {
        match status {
            WithdrawalStatus::Completed => self.completed += 1,
            WithdrawalStatus::Failed => self.failed += 1,
            _ => self.in_doubt += 1,
        }
    }

    pub fn processed(&self) -> usize {
        self.completed + self.failed + self.in_doubt
    }
}

/// Withdrawal manager
#[derive(Clone)]
pub struct WithdrawalManager {
    repo: Arc<dyn LedgerRepository>,
    bank: Arc<dyn BankTransfer>,
    transfer_timeout: Duration,
}

impl WithdrawalManager {
    /// Create a new withdrawal manager
    ///
    /// # Arguments
    ///
    /// * `repo` - Ledger storage
    /// * `bank` - Bank transfer collaborator
    /// * `transfer_timeout` - Upper bound on a single bank call
    pub fn new(
        repo: Arc<dyn LedgerRepository>,
        bank: Arc<dyn BankTransfer>,
        transfer_timeout: Duration,
    ) -> Self {
        Self {
            repo,
            bank,
            transfer_timeout,
        }
    }

    async fn available_for(&self, owner_kind: OwnerKind, owner_id: i64) -> LedgerResult<(String, i64)> {
        Ok(match owner_kind {
            OwnerKind::Shop => {
                let wallet = self.repo.get_or_create_shop_wallet(owner_id).await?;
                (format!("shop {owner_id} wallet"), wallet.available_balance)
            }
            OwnerKind::Customer => {
                let wallet = self.repo.get_or_create_customer_wallet(owner_id).await?;
                (format!("customer {owner_id} wallet"), wallet.balance)
            }
        })
    }

    /// Request a withdrawal to a bank account
    ///
    /// No money moves until an administrator approves the request.
    ///
    /// # Errors
    ///
    /// * `LedgerError::Validation` - Amount outside the configured range or bank details missing
    /// * `LedgerError::InsufficientBalance` - Withdrawable balance below `amount`
    pub async fn create(
        &self,
        owner_kind: OwnerKind,
        owner_id: i64,
        amount: i64,
        bank: BankAccount,
    ) -> LedgerResult<WithdrawalRequest> {
        let config = self.repo.platform_config().await?;

        if amount < config.min_withdrawal_amount {
            return Err(LedgerError::Validation(format!(
                "withdrawal amount {} is below the minimum of {}",
                amount, config.min_withdrawal_amount
            )));
        }
        if amount > config.max_withdrawal_amount {
            return Err(LedgerError::Validation(format!(
                "withdrawal amount {} exceeds the maximum of {}",
                amount, config.max_withdrawal_amount
            )));
        }
        bank.validate()?;

        let (wallet, available) = self.available_for(owner_kind, owner_id).await?;
        if available < amount {
            return Err(LedgerError::InsufficientBalance {
                wallet,
                available,
                required: amount,
            });
        }

        let request = self
            .repo
            .insert_withdrawal(NewWithdrawal {
                owner_kind,
                owner_id,
                amount,
                bank,
            })
            .await?;

        log::info!(
            "Withdrawal {} requested by {} {} for {}",
            request.id,
            owner_kind,
            owner_id,
            amount
        );
        Ok(request)
    }

    fn debit_for(request: &WithdrawalRequest) -> WalletMutation {
        let reference = Reference::withdrawal(request.id);
        let description = format!(
            "Withdrawal #{} to {} {}",
            request.id,
            request.bank.bank_name,
            request.bank.masked_account_number()
        );
        match request.owner_kind {
            OwnerKind::Shop => shop::debit(
                request.owner_id,
                request.amount,
                EntryType::Withdrawal,
                DrainPolicy::AvailableOnly,
                reference,
                &description,
            ),
            OwnerKind::Customer => customer::debit(
                request.owner_id,
                request.amount,
                EntryType::Withdrawal,
                reference,
                &description,
            ),
        }
    }

    fn recredit_for(request: &WithdrawalRequest, reason: &str) -> WalletMutation {
        let reference = Reference::withdrawal(request.id);
        let description = format!("Withdrawal #{} failed: {}", request.id, reason);
        match request.owner_kind {
            OwnerKind::Shop => shop::available_credit(
                request.owner_id,
                request.amount,
                EntryType::Withdrawal,
                reference,
                &description,
            ),
            OwnerKind::Customer => customer::credit(
                request.owner_id,
                request.amount,
                EntryType::Withdrawal,
                reference,
                &description,
            ),
        }
    }

    /// Approve a pending withdrawal and debit the wallet immediately
    ///
    /// # Errors
    ///
    /// * `LedgerError::IllegalStateTransition` - Request is not Pending
    /// * `LedgerError::InsufficientBalance` - Balance no longer covers the request
    pub async fn approve(
        &self,
        id: i64,
        admin_id: i64,
        note: Option<String>,
    ) -> LedgerResult<WithdrawalRequest> {
        let request = self.repo.get_withdrawal(id).await?;
        let debit = Self::debit_for(&request);

        let approved = self
            .repo
            .transition_withdrawal(
                id,
                &WithdrawalTransition::Approve { admin_id, note },
                Some(&debit),
            )
            .await?;

        log::info!(
            "Withdrawal {} approved by admin {}, {} debited from {} {}",
            id,
            admin_id,
            approved.amount,
            approved.owner_kind,
            approved.owner_id
        );
        Ok(approved)
    }

    pub async fn reject(
        &self,
        id: i64,
        admin_id: i64,
        reason: String,
    ) -> LedgerResult<WithdrawalRequest> {
        if reason.trim().is_empty() {
            return Err(LedgerError::Validation(
                "a rejection reason is required".to_string(),
            ));
        }
        let rejected = self
            .repo
            .transition_withdrawal(id, &WithdrawalTransition::Reject { admin_id, reason }, None)
            .await?;
        log::info!("Withdrawal {} rejected by admin {}", id, admin_id);
        Ok(rejected)
    }

    /// Cancel a pending request on behalf of its owner
    pub async fn cancel(
        &self,
        id: i64,
        owner_kind: OwnerKind,
        owner_id: i64,
    ) -> LedgerResult<WithdrawalRequest> {
        let request = self.repo.get_withdrawal(id).await?;
        if request.owner_kind != owner_kind {
            return Err(LedgerError::Validation(format!(
                "withdrawal {id} does not belong to {owner_kind} {owner_id}"
            )));
        }

        let cancelled = self
            .repo
            .transition_withdrawal(id, &WithdrawalTransition::Cancel { owner_id }, None)
            .await?;
        log::info!("Withdrawal {} cancelled by {} {}", id, owner_kind, owner_id);
        Ok(cancelled)
    }

    pub async fn get(&self, id: i64) -> LedgerResult<WithdrawalRequest> {
        self.repo.get_withdrawal(id).await
    }

    pub async fn list(&self, filter: &WithdrawalFilter) -> LedgerResult<Page<WithdrawalRequest>> {
        self.repo.list_withdrawals(filter).await
    }

    /// Withdrawal history of one owner, newest first
    pub async fn history(
        &self,
        owner_kind: OwnerKind,
        owner_id: i64,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> LedgerResult<Page<WithdrawalRequest>> {
        self.repo
            .list_withdrawals(&WithdrawalFilter {
                owner_kind: Some(owner_kind),
                owner_id: Some(owner_id),
                limit,
                offset,
                ..WithdrawalFilter::default()
            })
            .await
    }

    /// Run one settlement batch.
    ///
    /// Requests left in Processing by an earlier batch are resolved first,
    /// then up to `limit` approved requests are sent to the bank. A failure
    /// on one request is logged and does not stop the batch.
    pub async fn process_pending(&self, limit: i64) -> LedgerResult<WithdrawalBatchReport> {
        let mut report = WithdrawalBatchReport::default();

        let in_doubt = self
            .repo
            .list_withdrawals(&WithdrawalFilter {
                limit: Some(limit),
                ..WithdrawalFilter::with_status(WithdrawalStatus::Processing)
            })
            .await?;
        for request in in_doubt.items {
            match self.resume(&request).await {
                Ok(settled) => report.record(settled.status),
                Err(e) => {
                    report.errors += 1;
                    log::error!("Failed to resume withdrawal {}: {}", request.id, e);
                }
            }
        }

        let approved = self
            .repo
            .list_withdrawals(&WithdrawalFilter {
                limit: Some(limit),
                ..WithdrawalFilter::with_status(WithdrawalStatus::Approved)
            })
            .await?;
        for request in approved.items {
            match self.execute(&request).await {
                Ok(settled) => report.record(settled.status),
                Err(e) => {
                    report.errors += 1;
                    log::error!("Failed to process withdrawal {}: {}", request.id, e);
                }
            }
        }

        if report.processed() > 0 || report.errors > 0 {
            log::info!(
                "Withdrawal batch: {} completed, {} failed, {} in doubt, {} errors",
                report.completed,
                report.failed,
                report.in_doubt,
                report.errors
            );
        }
        Ok(report)
    }

    fn instruction(request: &WithdrawalRequest) -> TransferInstruction {
        TransferInstruction {
            idempotency_key: request.idempotency_key(),
            amount: request.amount,
            destination: request.bank.clone(),
            description: format!("Withdrawal #{}", request.id),
        }
    }

    async fn call_bank(&self, instruction: &TransferInstruction) -> Result<TransferReceipt, TransferError> {
        match tokio::time::timeout(self.transfer_timeout, self.bank.transfer(instruction)).await {
            Ok(result) => result,
            Err(_) => Err(TransferError::Timeout(self.transfer_timeout)),
        }
    }

    /// Send an approved request to the bank
    async fn execute(&self, request: &WithdrawalRequest) -> LedgerResult<WithdrawalRequest> {
        let processing = self
            .repo
            .transition_withdrawal(request.id, &WithdrawalTransition::StartProcessing, None)
            .await?;

        let instruction = Self::instruction(&processing);
        let outcome = TransferOutcome::from_result(self.call_bank(&instruction).await);
        self.settle(&processing, outcome).await
    }

    /// Resolve a request whose transfer outcome was unknown
    async fn resume(&self, request: &WithdrawalRequest) -> LedgerResult<WithdrawalRequest> {
        let key = request.idempotency_key();
        let status = match tokio::time::timeout(self.transfer_timeout, self.bank.transfer_status(&key)).await {
            Ok(result) => result,
            Err(_) => Err(TransferError::Timeout(self.transfer_timeout)),
        };

        let outcome = match status {
            Ok(Some(receipt)) => TransferOutcome::from_result(Ok(receipt)),
            // The bank never saw it; resubmitting under the same key is safe
            Ok(None) => {
                log::info!("Withdrawal {} unknown to bank, resubmitting", request.id);
                TransferOutcome::from_result(self.call_bank(&Self::instruction(request)).await)
            }
            Err(e) => TransferOutcome::Indeterminate {
                detail: e.to_string(),
            },
        };
        self.settle(request, outcome).await
    }

    async fn settle(
        &self,
        request: &WithdrawalRequest,
        outcome: TransferOutcome,
    ) -> LedgerResult<WithdrawalRequest> {
        match outcome {
            TransferOutcome::Succeeded { reference } => {
                let completed = self
                    .repo
                    .transition_withdrawal(
                        request.id,
                        &WithdrawalTransition::Complete {
                            transaction_reference: reference,
                        },
                        None,
                    )
                    .await?;
                log::info!("Withdrawal {} completed", request.id);
                Ok(completed)
            }
            TransferOutcome::Failed { reason } => {
                let recredit = Self::recredit_for(request, &reason);
                let failed = self
                    .repo
                    .transition_withdrawal(
                        request.id,
                        &WithdrawalTransition::Fail {
                            reason: reason.clone(),
                        },
                        Some(&recredit),
                    )
                    .await?;
                log::warn!(
                    "Withdrawal {} failed ({}), {} returned to {} {}",
                    request.id,
                    reason,
                    request.amount,
                    request.owner_kind,
                    request.owner_id
                );
                Ok(failed)
            }
            TransferOutcome::Indeterminate { detail } => {
                log::warn!(
                    "Withdrawal {} outcome unknown, will check again: {}",
                    request.id,
                    detail
                );
                self.repo
                    .transition_withdrawal(
                        request.id,
                        &WithdrawalTransition::Indeterminate { detail },
                        None,
                    )
                    .await
            }
        }
    }
}
