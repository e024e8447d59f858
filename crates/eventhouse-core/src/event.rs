//! Event Data Structures
//!
//! ## Event vs RecordedEvent
//!
//! An [`Event`] is what a writer hands to the store: an event type name, an
//! opaque payload and a metadata map. Once the store commits it, the event
//! comes back as a [`RecordedEvent`], which adds:
//! - **stream**: the `(type, id)` pair the event belongs to
//! - **version**: position within the stream, starting at 1, gap-free
//! - **global_sequence**: position across the whole store, strictly increasing
//! - **recorded_at**: commit timestamp (milliseconds since epoch)
//!
//! Recorded events are immutable. Nothing in the engine updates or deletes them.
//!
//! ## Metadata
//!
//! Metadata is a JSON object map. It is never absent: an event built without
//! metadata carries an empty map, so storage never sees a null.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CoreError, Result};
use crate::registry::Payload;

/// Free-form metadata attached to an event (correlation ids, causation, etc).
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Identifies an event stream: the ordered history of a single entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamId {
    /// Category of the entity (e.g. "order")
    pub stream_type: String,

    /// Identifier of the entity within its category (e.g. "42")
    pub stream_id: String,
}

impl StreamId {
    pub fn new(stream_type: impl Into<String>, stream_id: impl Into<String>) -> Self {
        Self {
            stream_type: stream_type.into(),
            stream_id: stream_id.into(),
        }
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.stream_type, self.stream_id)
    }
}

/// Optimistic concurrency expectation for an append.
///
/// `Exact(v)` means "the stream must currently be at version `v`"; a brand new
/// stream is at version 0. `Any` disables the check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VersionCheck {
    Any,
    Exact(i64),
}

impl VersionCheck {
    /// Whether a stream currently at `current` satisfies this expectation.
    pub fn matches(&self, current: i64) -> bool {
        match self {
            VersionCheck::Any => true,
            VersionCheck::Exact(expected) => *expected == current,
        }
    }
}

impl From<i64> for VersionCheck {
    fn from(version: i64) -> Self {
        VersionCheck::Exact(version)
    }
}

impl fmt::Display for VersionCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionCheck::Any => write!(f, "any"),
            VersionCheck::Exact(v) => write!(f, "{}", v),
        }
    }
}

/// A domain event waiting to be appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Discriminator used to pick a payload decoder
    pub event_type: String,

    /// Encoded payload, opaque to the store
    pub payload: Bytes,

    /// Additional key/value pairs stored alongside the payload
    #[serde(default)]
    pub metadata: Metadata,
}

impl Event {
    pub fn new(event_type: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            event_type: event_type.into(),
            payload: payload.into(),
            metadata: Metadata::new(),
        }
    }

    /// Encode a typed payload as JSON, tagging the event with `P::NAME`.
    pub fn from_payload<P: Payload>(payload: &P) -> Result<Self> {
        let bytes = serde_json::to_vec(payload)?;
        Ok(Self::new(P::NAME, bytes))
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Decode the payload as `P`, failing if the event type does not match.
    pub fn decode<P: Payload>(&self) -> Result<P> {
        decode_payload(&self.event_type, &self.payload)
    }
}

/// An event as committed to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedEvent {
    pub stream: StreamId,
    pub version: i64,
    pub global_sequence: i64,
    pub event_type: String,
    pub payload: Bytes,
    pub metadata: Metadata,
    /// Commit timestamp (milliseconds since Unix epoch)
    pub recorded_at: i64,
}

impl RecordedEvent {
    /// The pending-event view of this record. Payload bytes are shared, not copied.
    pub fn event(&self) -> Event {
        Event {
            event_type: self.event_type.clone(),
            payload: self.payload.clone(),
            metadata: self.metadata.clone(),
        }
    }

    pub fn decode<P: Payload>(&self) -> Result<P> {
        decode_payload(&self.event_type, &self.payload)
    }
}

fn decode_payload<P: Payload>(event_type: &str, payload: &[u8]) -> Result<P> {
    if event_type != P::NAME {
        return Err(CoreError::EventTypeMismatch {
            expected: P::NAME.to_string(),
            actual: event_type.to_string(),
        });
    }
    Ok(serde_json::from_slice(payload)?)
}

/// Which events a scan or stream selects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Predicate {
    /// Every event in the store, by global sequence
    All,

    /// Every event whose stream has the given type, by global sequence
    ByType(String),

    /// A single stream, by version
    ByStream(StreamId),
}

impl Predicate {
    /// The cursor value of `event` under this predicate.
    ///
    /// Per-stream reads are positioned by version; everything else by global
    /// sequence number.
    pub fn position_of(&self, event: &RecordedEvent) -> i64 {
        match self {
            Predicate::ByStream(_) => event.version,
            Predicate::All | Predicate::ByType(_) => event.global_sequence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct OrderPlaced {
        amount: u64,
    }

    impl Payload for OrderPlaced {
        const NAME: &'static str = "order_placed";
    }

    #[test]
    fn test_event_defaults_to_empty_metadata() {
        let event = Event::new("noop", Bytes::new());
        assert!(event.metadata.is_empty());

        let decoded: Event = serde_json::from_str(r#"{"event_type":"noop","payload":[]}"#).unwrap();
        assert!(decoded.metadata.is_empty());
    }

    #[test]
    fn test_typed_payload_roundtrip() {
        let event = Event::from_payload(&OrderPlaced { amount: 12 })
            .unwrap()
            .with_metadata("correlation_id", "abc");

        assert_eq!(event.event_type, "order_placed");
        assert_eq!(event.metadata["correlation_id"], "abc");
        assert_eq!(event.decode::<OrderPlaced>().unwrap(), OrderPlaced { amount: 12 });
    }

    #[test]
    fn test_decode_rejects_other_event_type() {
        let event = Event::new("order_cancelled", "{}");
        let err = event.decode::<OrderPlaced>().unwrap_err();
        assert!(matches!(err, CoreError::EventTypeMismatch { .. }));
    }

    #[test]
    fn test_version_check_matches() {
        assert!(VersionCheck::Any.matches(0));
        assert!(VersionCheck::Any.matches(17));
        assert!(VersionCheck::Exact(3).matches(3));
        assert!(!VersionCheck::Exact(3).matches(4));
        assert_eq!(VersionCheck::from(5), VersionCheck::Exact(5));
    }

    #[test]
    fn test_predicate_position() {
        let recorded = RecordedEvent {
            stream: StreamId::new("order", "42"),
            version: 2,
            global_sequence: 90,
            event_type: "order_placed".to_string(),
            payload: Bytes::from_static(b"{}"),
            metadata: Metadata::new(),
            recorded_at: 0,
        };

        assert_eq!(Predicate::All.position_of(&recorded), 90);
        assert_eq!(Predicate::ByType("order".into()).position_of(&recorded), 90);
        assert_eq!(
            Predicate::ByStream(StreamId::new("order", "42")).position_of(&recorded),
            2
        );
        assert_eq!(recorded.stream.to_string(), "order/42");
    }
}
