//! Bank transfer collaborator.
//!
//! The ledger only needs to know whether money left for the destination
//! account. A transfer call has three possible outcomes: the bank confirmed
//! it, the bank explicitly refused it, or we could not tell. Only the second
//! one may return funds to the wallet.

use crate::withdrawal::models::BankAccount;
use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

/// What to send where
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferInstruction {
    /// Stable per withdrawal, lets the bank deduplicate retries
    pub idempotency_key: String,
    pub amount: i64,
    pub destination: BankAccount,
    pub description: String,
}

/// Bank response to a transfer it processed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub success: bool,
    pub reference: Option<String>,
    pub failure_reason: Option<String>,
}

/// Errors talking to the bank
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransferError {
    /// Bank refused the transfer; no money moved
    #[error("Transfer rejected: {0}")]
    Rejected(String),

    /// Bank could not be reached or answered ambiguously
    #[error("Bank unavailable: {0}")]
    Unavailable(String),

    #[error("Bank call timed out after {0:?}")]
    Timeout(Duration),
}

/// Classified result of a transfer attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Succeeded { reference: Option<String> },
    Failed { reason: String },
    /// Unknown whether money moved; must be resolved before any re-credit
    Indeterminate { detail: String },
}

impl TransferOutcome {
    pub fn from_result(result: Result<TransferReceipt, TransferError>) -> Self {
        match result {
            Ok(receipt) if receipt.success => TransferOutcome::Succeeded {
                reference: receipt.reference,
            },
            Ok(receipt) => TransferOutcome::Failed {
                reason: receipt
                    .failure_reason
                    .unwrap_or_else(|| "transfer declined".to_string()),
            },
            Err(TransferError::Rejected(reason)) => TransferOutcome::Failed { reason },
            Err(err @ (TransferError::Unavailable(_) | TransferError::Timeout(_))) => {
                TransferOutcome::Indeterminate {
                    detail: err.to_string(),
                }
            }
        }
    }
}

/// Bank transfer collaborator
#[async_trait]
pub trait BankTransfer: Send + Sync {
    /// Execute a transfer. Repeating a key must not move money twice.
    async fn transfer(&self, instruction: &TransferInstruction)
    -> Result<TransferReceipt, TransferError>;

    /// Look up a transfer by idempotency key; `None` if the bank never saw it
    async fn transfer_status(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<TransferReceipt>, TransferError>;
}

/// How the simulated bank answers
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SimulationMode {
    Approve,
    Decline,
    /// Every call fails as unreachable without recording anything
    Unreachable,
    /// Declines the given fraction of transfers at random
    Flaky { failure_rate: f64 },
}

impl std::str::FromStr for SimulationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approve" => Ok(SimulationMode::Approve),
            "decline" => Ok(SimulationMode::Decline),
            "unreachable" => Ok(SimulationMode::Unreachable),
            "flaky" => Ok(SimulationMode::Flaky { failure_rate: 0.2 }),
            other => Err(format!("unknown bank simulation mode '{other}'")),
        }
    }
}

/// In-process bank stand-in
pub struct SimulatedBank {
    mode: Mutex<SimulationMode>,
    latency: Duration,
    receipts: Mutex<HashMap<String, TransferReceipt>>,
}

impl SimulatedBank {
    pub fn new(mode: SimulationMode) -> Self {
        Self {
            mode: Mutex::new(mode),
            latency: Duration::ZERO,
            receipts: Mutex::new(HashMap::new()),
        }
    }

    /// Delay every call by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub async fn set_mode(&self, mode: SimulationMode) {
        *self.mode.lock().await = mode;
    }

    /// Number of distinct transfers the bank has recorded
    pub async fn recorded_transfers(&self) -> usize {
        self.receipts.lock().await.len()
    }

    /// Record a receipt for a key as if an earlier call had reached the bank
    pub async fn record(&self, idempotency_key: &str, receipt: TransferReceipt) {
        self.receipts
            .lock()
            .await
            .insert(idempotency_key.to_string(), receipt);
    }

    fn decide(mode: SimulationMode) -> TransferReceipt {
        let declined = match mode {
            SimulationMode::Decline => true,
            SimulationMode::Flaky { failure_rate } => rand::rng().random_bool(failure_rate.clamp(0.0, 1.0)),
            SimulationMode::Approve | SimulationMode::Unreachable => false,
        };

        if declined {
            TransferReceipt {
                success: false,
                reference: None,
                failure_reason: Some("account rejected by receiving bank".to_string()),
            }
        } else {
            TransferReceipt {
                success: true,
                reference: Some(format!("SIM-{}", uuid::Uuid::new_v4().simple())),
                failure_reason: None,
            }
        }
    }
}

#[async_trait]
impl BankTransfer for SimulatedBank {
    async fn transfer(
        &self,
        instruction: &TransferInstruction,
    ) -> Result<TransferReceipt, TransferError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let mode = *self.mode.lock().await;
        if mode == SimulationMode::Unreachable {
            return Err(TransferError::Unavailable("connection refused".to_string()));
        }
        if instruction.amount <= 0 {
            return Err(TransferError::Rejected(format!(
                "invalid amount {}",
                instruction.amount
            )));
        }

        let mut receipts = self.receipts.lock().await;
        let receipt = receipts
            .entry(instruction.idempotency_key.clone())
            .or_insert_with(|| Self::decide(mode))
            .clone();
        Ok(receipt)
    }

    async fn transfer_status(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<TransferReceipt>, TransferError> {
        if *self.mode.lock().await == SimulationMode::Unreachable {
            return Err(TransferError::Unavailable("connection refused".to_string()));
        }
        Ok(self.receipts.lock().await.get(idempotency_key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instruction(key: &str) -> TransferInstruction {
        TransferInstruction {
            idempotency_key: key.to_string(),
            amount: 1_000,
            destination: BankAccount {
                bank_name: "ACB".to_string(),
                account_number: "9999".to_string(),
                account_holder: "Shop".to_string(),
            },
            description: "withdrawal".to_string(),
        }
    }

    #[test]
    fn test_outcome_classification() {
        assert!(matches!(
            TransferOutcome::from_result(Err(TransferError::Rejected("closed".into()))),
            TransferOutcome::Failed { reason } if reason == "closed"
        ));
        assert!(matches!(
            TransferOutcome::from_result(Err(TransferError::Timeout(Duration::from_secs(1)))),
            TransferOutcome::Indeterminate { .. }
        ));
        assert!(matches!(
            TransferOutcome::from_result(Ok(TransferReceipt {
                success: false,
                reference: None,
                failure_reason: None,
            })),
            TransferOutcome::Failed { .. }
        ));
    }

    #[tokio::test]
    async fn test_repeated_key_returns_same_receipt() {
        let bank = SimulatedBank::new(SimulationMode::Approve);
        let first = bank.transfer(&instruction("withdrawal-1")).await.unwrap();
        let second = bank.transfer(&instruction("withdrawal-1")).await.unwrap();
        assert!(first.success);
        assert_eq!(first, second);
        assert_eq!(bank.recorded_transfers().await, 1);
    }

    #[tokio::test]
    async fn test_unreachable_records_nothing() {
        let bank = SimulatedBank::new(SimulationMode::Unreachable);
        assert!(matches!(
            bank.transfer(&instruction("withdrawal-2")).await,
            Err(TransferError::Unavailable(_))
        ));

        bank.set_mode(SimulationMode::Approve).await;
        assert_eq!(bank.transfer_status("withdrawal-2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_decline_mode() {
        let bank = SimulatedBank::new(SimulationMode::Decline);
        let receipt = bank.transfer(&instruction("withdrawal-3")).await.unwrap();
        assert!(!receipt.success);
        assert!(receipt.failure_reason.is_some());
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("decline".parse::<SimulationMode>().unwrap(), SimulationMode::Decline);
        assert!("maybe".parse::<SimulationMode>().is_err());
    }
}
