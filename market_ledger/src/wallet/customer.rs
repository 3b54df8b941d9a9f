//! Customer wallet store.

use super::models::{CustomerOp, CustomerWallet};
use super::mutation::WalletMutation;
use crate::ledger::{EntryFilter, EntryType, LedgerEntry, LedgerResult, Page, Reference, WalletKind};
use crate::repository::LedgerRepository;
use std::sync::Arc;

pub fn credit(
    customer_id: i64,
    amount: i64,
    entry_type: EntryType,
    reference: Reference,
    description: &str,
) -> WalletMutation {
    WalletMutation::Customer {
        customer_id,
        op: CustomerOp::Credit {
            amount,
            entry_type,
            reference,
            description: description.to_string(),
        },
    }
}

pub fn debit(
    customer_id: i64,
    amount: i64,
    entry_type: EntryType,
    reference: Reference,
    description: &str,
) -> WalletMutation {
    WalletMutation::Customer {
        customer_id,
        op: CustomerOp::Debit {
            amount,
            entry_type,
            reference,
            description: description.to_string(),
        },
    }
}

/// Customer wallet store
#[derive(Clone)]
pub struct CustomerWalletStore {
    repo: Arc<dyn LedgerRepository>,
}

impl CustomerWalletStore {
    pub fn new(repo: Arc<dyn LedgerRepository>) -> Self {
        Self { repo }
    }

    pub async fn get_or_create(&self, customer_id: i64) -> LedgerResult<CustomerWallet> {
        self.repo.get_or_create_customer_wallet(customer_id).await
    }

    /// Credit the wallet
    ///
    /// Refund credits raise `total_refunded`; Withdrawal credits return a
    /// failed withdrawal and lower `total_withdrawn`.
    pub async fn add_balance(
        &self,
        customer_id: i64,
        amount: i64,
        entry_type: EntryType,
        reference: Reference,
        description: &str,
    ) -> LedgerResult<CustomerWallet> {
        let mutation = credit(customer_id, amount, entry_type, reference, description);
        let outcome = self.repo.apply_mutation(&mutation).await?;
        log::debug!("Applied {}", mutation);
        outcome.wallet.into_customer()
    }

    /// Debit the wallet
    ///
    /// # Errors
    ///
    /// * `LedgerError::InvalidAmount` - Amount is not positive
    /// * `LedgerError::InsufficientBalance` - Balance below `amount`
    pub async fn deduct_balance(
        &self,
        customer_id: i64,
        amount: i64,
        entry_type: EntryType,
        reference: Reference,
        description: &str,
    ) -> LedgerResult<CustomerWallet> {
        let mutation = debit(customer_id, amount, entry_type, reference, description);
        let outcome = self.repo.apply_mutation(&mutation).await?;
        log::debug!("Applied {}", mutation);
        outcome.wallet.into_customer()
    }

    pub async fn has_sufficient_balance(&self, customer_id: i64, amount: i64) -> LedgerResult<bool> {
        Ok(self
            .get_or_create(customer_id)
            .await?
            .has_sufficient_balance(amount))
    }

    pub async fn history(
        &self,
        customer_id: i64,
        filter: EntryFilter,
    ) -> LedgerResult<Page<LedgerEntry>> {
        self.repo
            .list_entries(&filter.with_wallet(WalletKind::Customer, customer_id))
            .await
    }
}
