//! Deadlines for database work.
//!
//! A lock wait or a stuck connection surfaces as `LedgerError::Timeout`
//! instead of hanging a request or a sweep.

use crate::ledger::{LedgerError, LedgerResult};
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

/// Default timeout for single queries such as the health ping (5 seconds)
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Default timeout for locking transactions (10 seconds)
pub const DEFAULT_TRANSACTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Execute a fallible operation with timeout
///
/// # Arguments
///
/// * `duration` - Timeout duration
/// * `future` - Async operation to execute
///
/// # Returns
///
/// * `LedgerResult<T>` - Result, the operation's own error, or `LedgerError::Timeout`
///
/// # Example
///
/// ```no_run
/// use market_ledger::db::timeouts::{with_timeout, DEFAULT_QUERY_TIMEOUT};
/// # use sqlx::PgPool;
/// # async fn example(pool: &PgPool) -> market_ledger::LedgerResult<()> {
///
/// with_timeout(
///     DEFAULT_QUERY_TIMEOUT,
///     sqlx::query("SELECT 1").execute(pool),
/// )
/// .await?;
///
/// # Ok(())
/// # }
/// ```
pub async fn with_timeout<F, T, E>(duration: Duration, future: F) -> LedgerResult<T>
where
    F: Future<Output = Result<T, E>>,
    LedgerError: From<E>,
{
    match timeout(duration, future).await {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(e)) => Err(LedgerError::from(e)),
        Err(_) => Err(LedgerError::Timeout(duration)),
    }
}
