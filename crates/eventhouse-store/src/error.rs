//! Store Error Types
//!
//! ## Error Categories
//!
//! ### Append Errors
//! - `Conflict`: the stream is not at the version the caller expected. Reload
//!   the stream and retry with fresh events.
//! - `Serialization`: payload or metadata could not be encoded. Not retryable
//!   without fixing the input.
//!
//! ### Consumer Group Errors
//! - `GroupNotFound`, `GroupAlreadyExists`, `InvalidGroupSize`
//! - `CapacityExceeded`: every member slot of the group is currently leased
//!
//! ### Lease Errors
//! - `LeaseNotFound`, `LeaseExpired`: the caller lost its slot and must announce
//!   again before consuming
//!
//! ### Backend Errors
//! - `Database`: driver or connectivity failure, surfaced unwrapped. The store
//!   never retries on its own.
//! - `Migration`, `Config`
//!
//! ## Usage
//!
//! ```ignore
//! match store.append(&id, VersionCheck::Exact(3), events).await {
//!     Ok(version) => println!("stream now at {}", version),
//!     Err(StoreError::Conflict { actual, .. }) => {
//!         // someone else wrote first; reload from `actual` and try again
//!     }
//!     Err(e) => return Err(e),
//! }
//! ```

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Version conflict on stream {stream}: expected {expected}, actual {actual}")]
    Conflict {
        stream: String,
        expected: i64,
        actual: i64,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Consumer group not found: {0}")]
    GroupNotFound(String),

    #[error("Consumer group already exists: {0}")]
    GroupAlreadyExists(String),

    #[error("Invalid consumer group size for {group}: {size}")]
    InvalidGroupSize { group: String, size: i64 },

    #[error("Consumer group {group} is full ({size} members leased)")]
    CapacityExceeded { group: String, size: u32 },

    #[error("Lease not found: {0}")]
    LeaseNotFound(String),

    #[error("Lease {lease_id} expired at {expired_at}")]
    LeaseExpired { lease_id: String, expired_at: i64 },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Core(#[from] eventhouse_core::CoreError),
}

impl StoreError {
    /// Whether retrying the same call may succeed.
    ///
    /// Conflicts need the caller to reload state first; database errors may be
    /// transient. Everything else fails again on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Conflict { .. } | StoreError::Database(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        StoreError::Migration(e.to_string())
    }
}

/// Whether a database error is a unique-constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}
