//! PostgreSQL pool and the ledger schema.

use crate::ledger::LedgerResult;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

pub mod config;
pub mod timeouts;

pub use config::DatabaseConfig;

/// Pool with the ledger schema applied
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Open the pool and bring the schema up to date
    ///
    /// ```no_run
    /// use market_ledger::db::{Database, DatabaseConfig};
    /// use market_ledger::repository::PgLedgerRepository;
    ///
    /// # async fn run() -> market_ledger::LedgerResult<()> {
    /// let db = Database::connect(&DatabaseConfig::from_env()?).await?;
    /// let repo = PgLedgerRepository::new(db.pool().clone());
    /// # Ok(())
    /// # }
    /// ```
    pub async fn connect(config: &DatabaseConfig) -> LedgerResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .max_lifetime(Duration::from_secs(config.max_lifetime_secs))
            .connect(&config.database_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        log::info!("Ledger schema is up to date");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}
