//! EventHouse Core
//!
//! Shared building blocks for the EventHouse event-sourcing engine.
//!
//! ## Contents
//!
//! - **Events**: [`Event`] (pending, not yet stored) and [`RecordedEvent`]
//!   (committed, carrying its stream version and global sequence number)
//! - **Streams**: [`StreamId`] identifies a stream by `(type, id)`, and
//!   [`VersionCheck`] expresses optimistic concurrency expectations
//! - **Partitioning**: [`partition`] maps a stream identifier onto a consumer
//!   group member index
//! - **Payloads**: [`Registry`] decodes opaque payload bytes back into typed
//!   values, keyed by event type name
//! - **Aggregates**: [`Aggregate`] and [`Root`] fold events into domain state and
//!   buffer newly recorded events until they are appended
//!
//! This crate performs no I/O. Storage lives in `eventhouse-store`, consumer
//! coordination in `eventhouse-consumer`.

pub mod aggregate;
pub mod error;
pub mod event;
pub mod partition;
pub mod registry;

pub use aggregate::{Aggregate, Root};
pub use error::{CoreError, Result};
pub use event::{now_ms, Event, Metadata, Predicate, RecordedEvent, StreamId, VersionCheck};
pub use partition::partition;
pub use registry::{Payload, Registry, RegistryBuilder};
