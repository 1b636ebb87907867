//! Configuration management for the server.

use bookhold_engine::{CoordinatorConfig, RetryPolicy};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// PostgreSQL connection URL
    pub database_url: String,
    pub database_max_connections: u32,
    /// Attempts per projection write before a saga step is exhausted
    pub commit_max_attempts: u32,
    /// First retry delay; doubles per attempt
    pub commit_backoff: Duration,
    /// Age after which the reconciler treats a claim as abandoned
    pub reconcile_grace: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let port = env::var("PORT")
            .unwrap_or_else(|_| "8888".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let database_url = env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)?;

        let database_max_connections = parse_or("DATABASE_MAX_CONNECTIONS", 10)?;
        let commit_max_attempts: u32 = parse_or("COMMIT_MAX_ATTEMPTS", 8)?;
        if commit_max_attempts == 0 {
            return Err(ConfigError::Invalid("COMMIT_MAX_ATTEMPTS"));
        }
        let commit_backoff = Duration::from_millis(parse_or("COMMIT_BACKOFF_MS", 10)?);
        let reconcile_grace = Duration::from_secs(parse_or("RECONCILE_GRACE_SECS", 30)?);

        Ok(Self {
            host,
            port,
            database_url,
            database_max_connections,
            commit_max_attempts,
            commit_backoff,
            reconcile_grace,
        })
    }

    /// Coordinator tuning derived from the environment.
    pub fn coordinator_config(&self) -> CoordinatorConfig {
        let defaults = RetryPolicy::default();
        CoordinatorConfig {
            retry: RetryPolicy {
                max_attempts: self.commit_max_attempts,
                base_backoff: self.commit_backoff,
                max_backoff: defaults.max_backoff.max(self.commit_backoff),
            },
            reconcile_grace: self.reconcile_grace,
        }
    }
}

fn parse_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(key)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("DATABASE_URL environment variable is required")]
    MissingDatabaseUrl,

    #[error("Invalid PORT value")]
    InvalidPort,

    #[error("Invalid {0} value")]
    Invalid(&'static str),
}
