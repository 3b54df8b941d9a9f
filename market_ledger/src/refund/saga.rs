//! Multi-wallet operations as a chain of atomic steps.
//!
//! Each step commits on its own. After a step succeeds its reversal is
//! remembered, and `unwind` applies the remembered reversals newest first.

use crate::ledger::{LedgerError, LedgerResult};
use crate::repository::LedgerRepository;
use crate::wallet::{MutationOutcome, WalletMutation};

/// Saga over wallet mutations
pub struct Saga<'a> {
    repo: &'a dyn LedgerRepository,
    operation: String,
    compensations: Vec<WalletMutation>,
}

impl<'a> Saga<'a> {
    pub fn new(repo: &'a dyn LedgerRepository, operation: impl Into<String>) -> Self {
        Self {
            repo,
            operation: operation.into(),
            compensations: Vec::new(),
        }
    }

    /// Apply one step and remember how to undo it
    pub async fn run(&mut self, mutation: WalletMutation) -> LedgerResult<MutationOutcome> {
        let outcome = self.repo.apply_mutation(&mutation).await?;
        let description = format!("Reversal of {} ({})", mutation, self.operation);
        if let Some(reversal) = mutation.reversal(&outcome, &description) {
            self.compensations.push(reversal);
        }
        Ok(outcome)
    }

    /// Number of committed steps
    pub fn steps(&self) -> usize {
        self.compensations.len()
    }

    /// Undo every committed step, newest first.
    ///
    /// Keeps going past a failed reversal so as much as possible is
    /// restored, then reports the first failure.
    pub async fn unwind(self) -> LedgerResult<()> {
        let mut first_failure = None;

        for reversal in self.compensations.into_iter().rev() {
            match self.repo.apply_mutation(&reversal).await {
                Ok(_) => log::info!("Compensated {} for {}", reversal, self.operation),
                Err(e) => {
                    log::error!(
                        "Compensation {} for {} failed: {}",
                        reversal,
                        self.operation,
                        e
                    );
                    first_failure.get_or_insert(e.to_string());
                }
            }
        }

        match first_failure {
            None => Ok(()),
            Some(reason) => Err(LedgerError::CompensationFailed {
                operation: self.operation,
                reason,
            }),
        }
    }
}
