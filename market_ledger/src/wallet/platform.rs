//! Platform wallet store.
//!
//! The platform wallet is a single row under a fixed key, created on first
//! access like any other wallet. Debits are not checked against its balance.

use super::models::{PLATFORM_WALLET_ID, PlatformOp, PlatformWallet};
use super::mutation::WalletMutation;
use crate::ledger::{
    EntryFilter, EntryType, LedgerEntry, LedgerError, LedgerResult, Page, Reference, WalletKind,
};
use crate::repository::LedgerRepository;
use std::sync::Arc;

/// Signed platform transaction
pub fn transaction(
    amount: i64,
    entry_type: EntryType,
    reference: Reference,
    description: &str,
) -> WalletMutation {
    WalletMutation::Platform {
        op: PlatformOp::Apply {
            amount,
            entry_type,
            reference,
            description: description.to_string(),
        },
    }
}

/// Commission booked for an order
pub fn commission(amount: i64, order_id: i64, description: &str) -> WalletMutation {
    transaction(
        amount,
        EntryType::CommissionIncome,
        Reference::order(order_id),
        description,
    )
}

/// Commission handed back on a refund
pub fn commission_refund(amount: i64, refund_id: i64, description: &str) -> WalletMutation {
    transaction(
        -amount,
        EntryType::CommissionRefund,
        Reference::refund(refund_id),
        description,
    )
}

fn require_positive(amount: i64) -> LedgerResult<()> {
    if amount <= 0 {
        return Err(LedgerError::InvalidAmount(amount));
    }
    Ok(())
}

/// Platform wallet store
#[derive(Clone)]
pub struct PlatformWalletStore {
    repo: Arc<dyn LedgerRepository>,
}

impl PlatformWalletStore {
    pub fn new(repo: Arc<dyn LedgerRepository>) -> Self {
        Self { repo }
    }

    pub async fn get_or_create(&self) -> LedgerResult<PlatformWallet> {
        self.repo.get_or_create_platform_wallet().await
    }

    /// Apply a signed change; counters follow `entry_type`
    ///
    /// # Errors
    ///
    /// * `LedgerError::InvalidAmount` - Amount is zero
    pub async fn apply_transaction(
        &self,
        amount: i64,
        entry_type: EntryType,
        reference: Reference,
        description: &str,
    ) -> LedgerResult<PlatformWallet> {
        self.apply(transaction(amount, entry_type, reference, description))
            .await
    }

    async fn apply(&self, mutation: WalletMutation) -> LedgerResult<PlatformWallet> {
        let outcome = self.repo.apply_mutation(&mutation).await?;
        log::debug!("Applied {}", mutation);
        outcome.wallet.into_platform()
    }

    pub async fn add_commission(
        &self,
        amount: i64,
        order_id: i64,
        description: &str,
    ) -> LedgerResult<PlatformWallet> {
        require_positive(amount)?;
        self.apply(commission(amount, order_id, description)).await
    }

    pub async fn refund_commission(
        &self,
        amount: i64,
        refund_id: i64,
        description: &str,
    ) -> LedgerResult<PlatformWallet> {
        require_positive(amount)?;
        self.apply(commission_refund(amount, refund_id, description))
            .await
    }

    /// Pay platform funds out to the operator's bank account
    pub async fn payout(
        &self,
        amount: i64,
        payout_id: i64,
        description: &str,
    ) -> LedgerResult<PlatformWallet> {
        require_positive(amount)?;
        self.apply(transaction(
            -amount,
            EntryType::PayoutToBank,
            Reference::manual(Some(payout_id)),
            description,
        ))
        .await
    }

    /// Correction in either direction, no counter side effects
    pub async fn manual_adjust(&self, amount: i64, description: &str) -> LedgerResult<PlatformWallet> {
        if description.trim().is_empty() {
            return Err(LedgerError::Validation(
                "manual adjustments need a description".to_string(),
            ));
        }
        self.apply(transaction(
            amount,
            EntryType::ManualAdjust,
            Reference::manual(None),
            description,
        ))
        .await
    }

    pub async fn history(&self, filter: EntryFilter) -> LedgerResult<Page<LedgerEntry>> {
        self.repo
            .list_entries(&filter.with_wallet(WalletKind::Platform, PLATFORM_WALLET_ID))
            .await
    }
}
