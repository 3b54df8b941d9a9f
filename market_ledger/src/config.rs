//! Platform configuration and engine settings.
//!
//! `PlatformConfig` is persisted and editable by administrators at runtime.
//! `LedgerSettings` is read once from the environment at startup.

use crate::ledger::{LedgerError, LedgerResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Persisted platform configuration (single record)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// Smallest amount a withdrawal may request
    pub min_withdrawal_amount: i64,

    /// Largest amount a withdrawal may request
    pub max_withdrawal_amount: i64,

    /// Days an order's shop share stays pending after completion
    pub order_holding_days: i32,

    /// Days after completion during which a refund may be requested
    pub max_refund_days: i32,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            min_withdrawal_amount: 100_000,
            max_withdrawal_amount: 50_000_000,
            order_holding_days: 7,
            max_refund_days: 7,
        }
    }
}

impl PlatformConfig {
    pub fn validate(&self) -> LedgerResult<()> {
        if self.min_withdrawal_amount <= 0 {
            return Err(LedgerError::Validation(
                "min_withdrawal_amount must be positive".to_string(),
            ));
        }
        if self.max_withdrawal_amount < self.min_withdrawal_amount {
            return Err(LedgerError::Validation(format!(
                "max_withdrawal_amount ({}) is below min_withdrawal_amount ({})",
                self.max_withdrawal_amount, self.min_withdrawal_amount
            )));
        }
        if self.order_holding_days < 0 || self.max_refund_days < 0 {
            return Err(LedgerError::Validation(
                "day counts cannot be negative".to_string(),
            ));
        }
        Ok(())
    }

    /// Holding window as a chrono duration
    pub fn holding_period(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.order_holding_days))
    }

    pub fn refund_window(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.max_refund_days))
    }
}

/// What to do when a customer cannot cover a refund owed to the shop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShortfallPolicy {
    /// Skip the customer debit and record a debt for the amount
    RecordDebt,
    /// Fail the refund
    Reject,
}

impl FromStr for ShortfallPolicy {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "record_debt" => Ok(ShortfallPolicy::RecordDebt),
            "reject" => Ok(ShortfallPolicy::Reject),
            other => Err(LedgerError::Validation(format!(
                "unknown shortfall policy '{other}'"
            ))),
        }
    }
}

/// Who pays for the platform fee when money moves back on a refund
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundPolicy {
    /// Platform returns its fee portion on refunds to the customer
    pub platform_funds_fee_on_customer_refund: bool,

    /// Platform returns its fee portion on refunds to the shop
    pub reverse_commission_on_shop_refund: bool,

    pub shortfall: ShortfallPolicy,
}

impl Default for RefundPolicy {
    fn default() -> Self {
        Self {
            platform_funds_fee_on_customer_refund: false,
            reverse_commission_on_shop_refund: false,
            shortfall: ShortfallPolicy::RecordDebt,
        }
    }
}

/// Engine settings loaded at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerSettings {
    pub refund_policy: RefundPolicy,

    /// Delay between settlement sweeps
    pub sweep_interval: Duration,

    /// Upper bound on a single bank call
    pub transfer_timeout: Duration,

    /// Orders or withdrawals handled per sweep
    pub batch_size: i64,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            refund_policy: RefundPolicy::default(),
            sweep_interval: Duration::from_secs(3600),
            transfer_timeout: Duration::from_secs(30),
            batch_size: 100,
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> LedgerResult<T> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| LedgerError::Validation(format!("{name} has an invalid value '{raw}'"))),
        Err(_) => Ok(default),
    }
}

impl LedgerSettings {
    /// Load settings from environment variables
    ///
    /// Expected environment variables:
    /// - `REFUND_PLATFORM_FUNDS_FEE`: platform returns its fee on refunds to customers (default: false)
    /// - `REFUND_REVERSE_COMMISSION`: platform returns its fee on refunds to shops (default: false)
    /// - `REFUND_SHORTFALL_POLICY`: `record_debt` or `reject` (default: record_debt)
    /// - `SWEEP_INTERVAL_SECS`: seconds between settlement sweeps (default: 3600)
    /// - `TRANSFER_TIMEOUT_SECS`: bank call timeout in seconds (default: 30)
    /// - `SWEEP_BATCH_SIZE`: items per sweep (default: 100)
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::Validation` if a variable is set but cannot be parsed
    pub fn from_env() -> LedgerResult<Self> {
        let defaults = Self::default();

        let settings = Self {
            refund_policy: RefundPolicy {
                platform_funds_fee_on_customer_refund: env_or(
                    "REFUND_PLATFORM_FUNDS_FEE",
                    defaults.refund_policy.platform_funds_fee_on_customer_refund,
                )?,
                reverse_commission_on_shop_refund: env_or(
                    "REFUND_REVERSE_COMMISSION",
                    defaults.refund_policy.reverse_commission_on_shop_refund,
                )?,
                shortfall: env_or("REFUND_SHORTFALL_POLICY", defaults.refund_policy.shortfall)?,
            },
            sweep_interval: Duration::from_secs(env_or(
                "SWEEP_INTERVAL_SECS",
                defaults.sweep_interval.as_secs(),
            )?),
            transfer_timeout: Duration::from_secs(env_or(
                "TRANSFER_TIMEOUT_SECS",
                defaults.transfer_timeout.as_secs(),
            )?),
            batch_size: env_or("SWEEP_BATCH_SIZE", defaults.batch_size)?,
        };

        if settings.sweep_interval.is_zero() || settings.transfer_timeout.is_zero() {
            return Err(LedgerError::Validation(
                "sweep interval and transfer timeout must be non-zero".to_string(),
            ));
        }
        if settings.batch_size <= 0 {
            return Err(LedgerError::Validation(
                "SWEEP_BATCH_SIZE must be positive".to_string(),
            ));
        }

        Ok(settings)
    }
}
