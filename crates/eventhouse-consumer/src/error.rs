//! Error types for EventHouse consumers

use eventhouse_store::StoreError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConsumerError>;

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("No lease held for group {0}")]
    NotAnnounced(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ConsumerError {
    /// Whether the caller's member slot is gone and it must announce again
    /// before consuming.
    pub fn is_lease_lost(&self) -> bool {
        matches!(
            self,
            ConsumerError::NotAnnounced(_)
                | ConsumerError::Store(StoreError::LeaseExpired { .. })
                | ConsumerError::Store(StoreError::LeaseNotFound(_))
        )
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            ConsumerError::Store(e) => e.is_retryable(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_lost_classification() {
        let expired = ConsumerError::from(StoreError::LeaseExpired {
            lease_id: "l".into(),
            expired_at: 10,
        });
        assert!(expired.is_lease_lost());
        assert!(!expired.is_retryable());

        assert!(ConsumerError::NotAnnounced("g".into()).is_lease_lost());
        assert!(!ConsumerError::Config("bad".into()).is_lease_lost());

        let conflict = ConsumerError::from(StoreError::Conflict {
            stream: "order/1".into(),
            expected: 0,
            actual: 1,
        });
        assert!(conflict.is_retryable());
        assert_eq!(
            conflict.to_string(),
            "Version conflict on stream order/1: expected 0, actual 1"
        );
    }
}
