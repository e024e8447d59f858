//! Core Error Types
//!
//! Errors raised while encoding, decoding or folding events. None of these are
//! transient: retrying the same input produces the same failure.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown event type: {0}")]
    UnknownEventType(String),

    #[error("Event type already registered: {0}")]
    DuplicateEventType(String),

    #[error("Event type mismatch: expected {expected}, got {actual}")]
    EventTypeMismatch { expected: String, actual: String },

    #[error("Failed to apply event {event_type} to {aggregate}: {reason}")]
    Apply {
        aggregate: String,
        event_type: String,
        reason: String,
    },
}
