//! Server configuration management.
//!
//! Consolidates all environment variable reads and provides validated configuration.

use market_ledger::{LedgerSettings, bank::SimulationMode, db::DatabaseConfig};
use std::net::SocketAddr;

/// Default HTTP bind address
const DEFAULT_BIND: &str = "127.0.0.1:8080";

/// Complete server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server bind address
    pub bind: SocketAddr,
    /// Database configuration, `None` in in-memory mode
    pub database: Option<DatabaseConfig>,
    /// Prometheus scrape address, metrics disabled when unset
    pub metrics_bind: Option<SocketAddr>,
    /// Engine settings: refund policy, sweep cadence, bank timeout
    pub ledger: LedgerSettings,
    /// How the simulated bank answers transfers
    pub bank_mode: SimulationMode,
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// # Arguments
    ///
    /// * `bind_override` - Optional bind address override (from CLI args)
    /// * `database_url_override` - Optional database URL override (from CLI args)
    /// * `in_memory` - Run without PostgreSQL
    ///
    /// # Errors
    ///
    /// Returns error if required variables are missing or invalid
    pub fn from_env(
        bind_override: Option<SocketAddr>,
        database_url_override: Option<String>,
        in_memory: bool,
    ) -> Result<Self, ConfigError> {
        let bind = match bind_override {
            Some(bind) => bind,
            None => parse_env_or("SERVER_BIND", DEFAULT_BIND)?,
        };

        let database = if in_memory {
            None
        } else {
            let database_url = database_url_override
                .or_else(|| std::env::var("DATABASE_URL").ok())
                .ok_or_else(|| ConfigError::MissingRequired {
                    var: "DATABASE_URL".to_string(),
                    hint: "Pass --db-url or run with --in-memory".to_string(),
                })?;

            Some(DatabaseConfig {
                database_url,
                max_connections: parse_env_or("DB_MAX_CONNECTIONS", "20")?,
                min_connections: parse_env_or("DB_MIN_CONNECTIONS", "5")?,
                connection_timeout_secs: parse_env_or("DB_CONNECTION_TIMEOUT", "10")?,
                idle_timeout_secs: parse_env_or("DB_IDLE_TIMEOUT", "600")?,
                max_lifetime_secs: parse_env_or("DB_MAX_LIFETIME", "1800")?,
            })
        };

        let metrics_bind = match std::env::var("METRICS_BIND") {
            Ok(raw) => Some(raw.parse().map_err(|_| ConfigError::Invalid {
                var: "METRICS_BIND".to_string(),
                reason: format!("'{raw}' is not a socket address"),
            })?),
            Err(_) => None,
        };

        let ledger = LedgerSettings::from_env().map_err(|e| ConfigError::Invalid {
            var: "ledger settings".to_string(),
            reason: e.to_string(),
        })?;

        let bank_mode = std::env::var("BANK_SIMULATION")
            .unwrap_or_else(|_| "approve".to_string())
            .parse()
            .map_err(|reason| ConfigError::Invalid {
                var: "BANK_SIMULATION".to_string(),
                reason,
            })?;

        Ok(ServerConfig {
            bind,
            database,
            metrics_bind,
            ledger,
            bank_mode,
        })
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(database) = &self.database {
            if database.min_connections > database.max_connections {
                return Err(ConfigError::Invalid {
                    var: "DB_MIN_CONNECTIONS".to_string(),
                    reason: format!(
                        "Cannot exceed max connections ({})",
                        database.max_connections
                    ),
                });
            }
        }

        if self.metrics_bind == Some(self.bind) {
            return Err(ConfigError::Invalid {
                var: "METRICS_BIND".to_string(),
                reason: "Must differ from the API bind address".to_string(),
            });
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {var}\nHint: {hint}")]
    MissingRequired { var: String, hint: String },

    #[error("Invalid configuration for {var}: {reason}")]
    Invalid { var: String, reason: String },
}

/// Parse an environment variable, falling back to `default` when unset
fn parse_env_or<T>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    let raw = std::env::var(key).unwrap_or_else(|_| default.to_string());
    raw.parse().map_err(|_| ConfigError::Invalid {
        var: key.to_string(),
        reason: format!("cannot parse '{raw}'"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn config() -> ServerConfig {
        ServerConfig {
            bind: "127.0.0.1:8080".parse().unwrap(),
            database: Some(DatabaseConfig {
                database_url: "test".to_string(),
                max_connections: 10,
                min_connections: 1,
                connection_timeout_secs: 5,
                idle_timeout_secs: 300,
                max_lifetime_secs: 1800,
            }),
            metrics_bind: None,
            ledger: LedgerSettings::default(),
            bank_mode: SimulationMode::Approve,
        }
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::MissingRequired {
            var: "DATABASE_URL".to_string(),
            hint: "Use --in-memory".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("DATABASE_URL"));
        assert!(msg.contains("Use --in-memory"));
    }

    #[test]
    fn test_config_validation_pool_bounds() {
        let mut config = config();
        assert!(config.validate().is_ok());

        if let Some(database) = config.database.as_mut() {
            database.min_connections = 50;
        }
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_config_validation_metrics_port_clash() {
        let mut config = config();
        config.metrics_bind = Some(config.bind);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    #[serial]
    fn test_in_memory_needs_no_database_url() {
        unsafe {
            std::env::remove_var("DATABASE_URL");
            std::env::remove_var("SERVER_BIND");
            std::env::remove_var("BANK_SIMULATION");
        }
        let config = ServerConfig::from_env(None, None, true).unwrap();
        assert!(config.database.is_none());
        assert_eq!(config.bind, DEFAULT_BIND.parse().unwrap());
        assert_eq!(config.bank_mode, SimulationMode::Approve);

        assert!(matches!(
            ServerConfig::from_env(None, None, false),
            Err(ConfigError::MissingRequired { .. })
        ));
    }

    #[test]
    #[serial]
    fn test_bad_bank_mode_is_rejected() {
        unsafe {
            std::env::set_var("BANK_SIMULATION", "sometimes");
        }
        let result = ServerConfig::from_env(None, None, true);
        unsafe {
            std::env::remove_var("BANK_SIMULATION");
        }
        assert!(matches!(result, Err(ConfigError::Invalid { ref var, .. }) if var == "BANK_SIMULATION"));
    }
}
