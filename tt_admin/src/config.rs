//! Admin configuration management.
//!
//! Consolidates all environment variable reads and provides validated configuration.

use std::time::Duration;
use table_tennis::{
    db::{DatabaseConfig, DatabaseConfigError},
    tournament::ManagerConfig,
};

/// Complete admin configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct AdminConfig {
    /// Database configuration
    pub database: DatabaseConfig,
    /// Tournament manager settings
    pub manager: ManagerConfig,
}

impl AdminConfig {
    /// Load configuration from environment variables
    ///
    /// # Arguments
    ///
    /// * `database_url_override` - Optional database URL override (from CLI args)
    /// * `lock_timeout_override` - Optional lock timeout in seconds (from CLI args)
    ///
    /// # Errors
    ///
    /// Returns error if `DATABASE_URL` is missing or a numeric setting is malformed
    pub fn from_env(
        database_url_override: Option<String>,
        lock_timeout_override: Option<u64>,
    ) -> Result<Self, ConfigError> {
        let database = match database_url_override {
            Some(url) => DatabaseConfig::with_url_from_env(url),
            None => DatabaseConfig::from_env(),
        }
        .map_err(|err| match err {
            DatabaseConfigError::Missing(var) => ConfigError::MissingRequired {
                var: var.to_string(),
                hint: "Set it in .env or pass --db-url".to_string(),
            },
            DatabaseConfigError::Invalid { var, value } => ConfigError::Invalid {
                var: var.to_string(),
                reason: format!("'{value}' is not a valid number"),
            },
        })?;

        let lock_timeout_secs = match lock_timeout_override {
            Some(secs) => secs,
            None => parse_env_or("TT_LOCK_TIMEOUT_SECS", 5)?,
        };

        Ok(AdminConfig {
            database,
            manager: ManagerConfig {
                lock_timeout: Duration::from_secs(lock_timeout_secs),
            },
        })
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = &self.database.database_url;
        if !(url.starts_with("postgres://") || url.starts_with("postgresql://")) {
            return Err(ConfigError::Invalid {
                var: "DATABASE_URL".to_string(),
                reason: "Must be a postgres:// connection string".to_string(),
            });
        }

        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid {
                var: "DB_MAX_CONNECTIONS".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigError::Invalid {
                var: "DB_MIN_CONNECTIONS".to_string(),
                reason: format!(
                    "Cannot exceed max connections ({})",
                    self.database.max_connections
                ),
            });
        }

        if self.manager.lock_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                var: "TT_LOCK_TIMEOUT_SECS".to_string(),
                reason: "Must be greater than 0".to_string(),
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

/// Parse an environment variable, using `default` only when it is unset
fn parse_env_or<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    parse_or(key, std::env::var(key).ok(), default)
}

fn parse_or<T>(key: &str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    match raw {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
            var: key.to_string(),
            reason: format!("'{value}' is not a valid value"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AdminConfig {
        AdminConfig {
            database: DatabaseConfig::development(),
            manager: ManagerConfig::default(),
        }
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::MissingRequired {
            var: "DATABASE_URL".to_string(),
            hint: "Pass --db-url".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("DATABASE_URL"));
        assert!(msg.contains("Pass --db-url"));
    }

    #[test]
    fn test_development_config_is_valid() {
        assert!(config().validate().is_ok());
    }

    #[test]
    fn test_config_validation_rejects_other_databases() {
        let mut config = config();
        config.database.database_url = "mysql://localhost/cup".to_string();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref var, .. } if var == "DATABASE_URL"));
    }

    #[test]
    fn test_config_validation_pool_bounds() {
        let mut config = config();
        config.database.min_connections = 20;
        config.database.max_connections = 10;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref var, .. } if var == "DB_MIN_CONNECTIONS"));
    }

    #[test]
    fn test_config_validation_lock_timeout() {
        let mut config = config();
        config.manager.lock_timeout = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_value_is_reported() {
        let err = parse_or::<u64>("TT_LOCK_TIMEOUT_SECS", Some("soon".to_string()), 5).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref var, .. } if var == "TT_LOCK_TIMEOUT_SECS"));
        assert!(err.to_string().contains("'soon'"));

        assert_eq!(parse_or::<u64>("TT_LOCK_TIMEOUT_SECS", Some(" 12 ".to_string()), 5).unwrap(), 12);
        assert_eq!(parse_or::<u64>("TT_LOCK_TIMEOUT_SECS", None, 5).unwrap(), 5);
    }

    #[test]
    fn test_override_wins_over_environment() {
        let config = AdminConfig::from_env(Some("postgres://admin@db/cup".to_string()), Some(9)).unwrap();
        assert_eq!(config.database.database_url, "postgres://admin@db/cup");
        assert_eq!(config.manager.lock_timeout, Duration::from_secs(9));
    }
}
