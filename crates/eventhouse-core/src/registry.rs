//! Payload Registry
//!
//! The store keeps payloads as opaque bytes. Readers that want typed values look
//! the event type up in a [`Registry`] to find the matching decoder.
//!
//! A registry is assembled once with [`RegistryBuilder`] during startup and is
//! immutable afterwards. Share it with `Arc<Registry>`; there is no global
//! instance.
//!
//! ```ignore
//! let registry = Registry::builder()
//!     .register::<OrderPlaced>()?
//!     .register::<OrderShipped>()?
//!     .build();
//!
//! let payload = registry.decode(&recorded)?;
//! if let Some(placed) = payload.downcast_ref::<OrderPlaced>() {
//!     // ...
//! }
//! ```

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;

use crate::error::{CoreError, Result};
use crate::event::RecordedEvent;

/// A typed event payload with a stable name.
///
/// `NAME` is written to storage as the event type and must never change once
/// events with it exist.
pub trait Payload: Serialize + DeserializeOwned + Send + Sync + 'static {
    const NAME: &'static str;
}

/// Decoded payload, to be downcast by the caller.
pub type DecodedPayload = Box<dyn Any + Send + Sync>;

type Decoder = fn(&[u8]) -> Result<DecodedPayload>;

fn decode_json<P: Payload>(bytes: &[u8]) -> Result<DecodedPayload> {
    let payload: P = serde_json::from_slice(bytes)?;
    Ok(Box::new(payload))
}

/// Collects decoders before the registry is frozen.
#[derive(Default)]
pub struct RegistryBuilder {
    decoders: HashMap<&'static str, Decoder>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `P` under `P::NAME`.
    ///
    /// # Errors
    ///
    /// - `DuplicateEventType`: another payload already uses this name
    pub fn register<P: Payload>(mut self) -> Result<Self> {
        if self.decoders.contains_key(P::NAME) {
            return Err(CoreError::DuplicateEventType(P::NAME.to_string()));
        }
        self.decoders.insert(P::NAME, decode_json::<P>);
        Ok(self)
    }

    pub fn build(self) -> Registry {
        Registry {
            decoders: self.decoders,
        }
    }
}

/// Immutable event type to decoder lookup table.
pub struct Registry {
    decoders: HashMap<&'static str, Decoder>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    pub fn contains(&self, event_type: &str) -> bool {
        self.decoders.contains_key(event_type)
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    /// Decode a recorded event's payload with the decoder registered for its type.
    ///
    /// # Errors
    ///
    /// - `UnknownEventType`: nothing registered under `event.event_type`
    /// - `Serialization`: the payload bytes do not match the registered type
    pub fn decode(&self, event: &RecordedEvent) -> Result<DecodedPayload> {
        let decoder = self
            .decoders
            .get(event.event_type.as_str())
            .ok_or_else(|| CoreError::UnknownEventType(event.event_type.clone()))?;
        decoder(&event.payload)
    }

    /// Decode and downcast in one step.
    pub fn decode_as<P: Payload>(&self, event: &RecordedEvent) -> Result<P> {
        let decoded = self.decode(event)?;
        decoded
            .downcast::<P>()
            .map(|payload| *payload)
            .map_err(|_| CoreError::EventTypeMismatch {
                expected: P::NAME.to_string(),
                actual: event.event_type.clone(),
            })
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.decoders.keys().collect();
        names.sort();
        f.debug_struct("Registry").field("event_types", &names).finish()
    }
}
