//! Store Configuration
//!
//! ## Environment Variables
//!
//! | Variable | Default |
//! |----------|---------|
//! | `EVENTHOUSE_DATABASE_URL` (falls back to `DATABASE_URL`) | `sqlite://eventhouse.db` |
//! | `EVENTHOUSE_MAX_CONNECTIONS` | `10` |
//! | `EVENTHOUSE_BUSY_TIMEOUT_MS` | `5000` |
//! | `EVENTHOUSE_NOTIFICATION_CAPACITY` | `1024` |

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Result, StoreError};

/// Connection settings shared by all backends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// `sqlite://path`, `sqlite::memory:` or `postgres://...`
    pub database_url: String,

    /// Connection pool size
    pub max_connections: u32,

    /// How long SQLite waits on a locked database before failing
    pub busy_timeout_ms: u64,

    /// Buffered append notifications per live reader before it lags
    pub notification_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://eventhouse.db".to_string(),
            max_connections: 10,
            busy_timeout_ms: 5_000,
            notification_capacity: 1024,
        }
    }
}

impl StoreConfig {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            ..Default::default()
        }
    }

    /// Build a config from `EVENTHOUSE_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let database_url = std::env::var("EVENTHOUSE_DATABASE_URL")
            .or_else(|_| std::env::var("DATABASE_URL"))
            .unwrap_or(defaults.database_url);

        Ok(Self {
            database_url,
            max_connections: env_or("EVENTHOUSE_MAX_CONNECTIONS", defaults.max_connections)?,
            busy_timeout_ms: env_or("EVENTHOUSE_BUSY_TIMEOUT_MS", defaults.busy_timeout_ms)?,
            notification_capacity: env_or(
                "EVENTHOUSE_NOTIFICATION_CAPACITY",
                defaults.notification_capacity,
            )?,
        })
    }

    pub fn max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn notification_capacity(mut self, capacity: usize) -> Self {
        self.notification_capacity = capacity;
        self
    }

    pub fn busy_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn is_postgres(&self) -> bool {
        self.database_url.starts_with("postgres://") || self.database_url.starts_with("postgresql://")
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| StoreError::Config(format!("{} has invalid value '{}'", key, raw))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.busy_timeout_duration(), Duration::from_secs(5));
        assert!(!config.is_postgres());
    }

    #[test]
    fn test_builder_setters() {
        let config = StoreConfig::new("postgres://localhost/events")
            .max_connections(4)
            .busy_timeout(Duration::from_millis(250))
            .notification_capacity(16);

        assert!(config.is_postgres());
        assert_eq!(config.max_connections, 4);
        assert_eq!(config.busy_timeout_ms, 250);
        assert_eq!(config.notification_capacity, 16);
    }

    #[test]
    fn test_deserialize_partial() {
        let config: StoreConfig =
            serde_json::from_str(r#"{"database_url":"sqlite::memory:","max_connections":1}"#)
                .unwrap();
        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.max_connections, 1);
        assert_eq!(config.notification_capacity, 1024);
    }

    #[test]
    fn test_env_or_rejects_garbage() {
        std::env::set_var("EVENTHOUSE_TEST_ENV_OR", "lots");
        let result: Result<u32> = env_or("EVENTHOUSE_TEST_ENV_OR", 3);
        assert!(matches!(result, Err(StoreError::Config(_))));
        std::env::remove_var("EVENTHOUSE_TEST_ENV_OR");

        let fallback: u32 = env_or("EVENTHOUSE_TEST_ENV_OR_MISSING", 3).unwrap();
        assert_eq!(fallback, 3);
    }
}
