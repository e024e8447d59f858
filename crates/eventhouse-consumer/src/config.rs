//! Consumer Configuration
//!
//! | Variable | Default |
//! |----------|---------|
//! | `EVENTHOUSE_LEASE_TTL_MS` | `3600000` (1 hour) |
//! | `EVENTHOUSE_RENEWAL_INTERVAL_MS` | one third of the TTL |
//! | `EVENTHOUSE_BATCH_SIZE` | `100` |
//! | `EVENTHOUSE_REFRESH_TIMEOUT_MS` | `10000` |

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{ConsumerError, Result};

/// Default lease lifetime (1 hour)
pub const DEFAULT_LEASE_TTL_MS: i64 = 3_600_000;

/// Default rows fetched per scan
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Default live-tail safety-net poll (10 seconds)
pub const DEFAULT_REFRESH_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// How long an announced or renewed lease stays valid
    pub lease_ttl_ms: i64,

    /// How often the background task renews the lease
    pub renewal_interval_ms: u64,

    /// Rows fetched per scan
    pub batch_size: usize,

    /// Longest a live stream waits for a notification before polling anyway
    pub refresh_timeout_ms: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            lease_ttl_ms: DEFAULT_LEASE_TTL_MS,
            renewal_interval_ms: (DEFAULT_LEASE_TTL_MS / 3) as u64,
            batch_size: DEFAULT_BATCH_SIZE,
            refresh_timeout_ms: DEFAULT_REFRESH_TIMEOUT_MS,
        }
    }
}

impl ConsumerConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let lease_ttl_ms: i64 = env_or("EVENTHOUSE_LEASE_TTL_MS", defaults.lease_ttl_ms)?;

        let config = Self {
            lease_ttl_ms,
            renewal_interval_ms: env_or(
                "EVENTHOUSE_RENEWAL_INTERVAL_MS",
                (lease_ttl_ms / 3).max(1) as u64,
            )?,
            batch_size: env_or("EVENTHOUSE_BATCH_SIZE", defaults.batch_size)?,
            refresh_timeout_ms: env_or("EVENTHOUSE_REFRESH_TIMEOUT_MS", defaults.refresh_timeout_ms)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Set the lease TTL; the renewal interval follows at one third of it.
    pub fn lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl_ms = ttl.as_millis() as i64;
        self.renewal_interval_ms = (self.lease_ttl_ms / 3).max(1) as u64;
        self
    }

    pub fn renewal_interval(mut self, interval: Duration) -> Self {
        self.renewal_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn renewal_interval_duration(&self) -> Duration {
        Duration::from_millis(self.renewal_interval_ms)
    }

    pub fn refresh_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.refresh_timeout_ms)
    }

    /// Reject settings under which a lease could lapse between renewals.
    pub fn validate(&self) -> Result<()> {
        if self.lease_ttl_ms <= 0 {
            return Err(ConsumerError::Config("lease TTL must be positive".to_string()));
        }
        if self.renewal_interval_ms == 0 || self.renewal_interval_ms as i64 >= self.lease_ttl_ms {
            return Err(ConsumerError::Config(format!(
                "renewal interval {}ms must be between 1 and the lease TTL {}ms",
                self.renewal_interval_ms, self.lease_ttl_ms
            )));
        }
        if self.refresh_timeout_ms == 0 {
            return Err(ConsumerError::Config("refresh timeout must be positive".to_string()));
        }
        Ok(())
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| ConsumerError::Config(format!("{} has invalid value '{}'", key, raw))),
        Err(_) => Ok(default),
    }
}
