//! Subscription Checkpoints
//!
//! A checkpoint is the last global sequence number a named subscription has
//! finished processing. Writes are plain upserts: the last write wins and
//! nothing stops a checkpoint from moving backwards, so callers must write
//! positions in increasing order themselves.
//!
//! Because processing and checkpointing are separate steps, a crash between
//! them replays the events after the checkpoint. Handlers must tolerate
//! at-least-once delivery.

use crate::error::Result;
use crate::reader::{EventStream, StreamMode, StreamReader, StreamRequest};
use eventhouse_core::{Predicate, RecordedEvent};
use eventhouse_store::{EventStore, Lease};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Read/write access to subscription checkpoints.
#[derive(Clone)]
pub struct Checkpointer {
    store: Arc<dyn EventStore>,
}

impl Checkpointer {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }

    /// Last processed sequence for `subscription`, 0 if it never checkpointed.
    pub async fn read(&self, subscription: &str) -> Result<i64> {
        Ok(self.store.read_checkpoint(subscription).await?)
    }

    pub async fn write(&self, subscription: &str, sequence_number: i64) -> Result<()> {
        self.store
            .write_checkpoint(subscription, sequence_number)
            .await?;
        Ok(())
    }
}

/// A named, resumable reader: pairs a checkpoint with a stream.
#[derive(Clone)]
pub struct Subscription {
    name: String,
    checkpointer: Checkpointer,
    reader: StreamReader,
}

impl Subscription {
    pub fn new(name: impl Into<String>, checkpointer: Checkpointer, reader: StreamReader) -> Self {
        Self {
            name: name.into(),
            checkpointer,
            reader,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// First global sequence number not yet processed.
    pub async fn resume_from(&self) -> Result<i64> {
        Ok(self.checkpointer.read(&self.name).await? + 1)
    }

    /// Stream everything after the checkpoint.
    ///
    /// Per-stream predicates are positioned by version, not global sequence,
    /// so subscriptions should use [`Predicate::All`] or [`Predicate::ByType`].
    pub async fn stream(
        &self,
        predicate: Predicate,
        mode: StreamMode,
        lease: Option<Lease>,
        cancel: CancellationToken,
    ) -> Result<EventStream> {
        let from = self.resume_from().await?;

        debug!(subscription = %self.name, from, mode = ?mode, "Resuming subscription");

        let mut request = StreamRequest::new(predicate).from(from).mode(mode);
        if let Some(lease) = lease {
            request = request.lease(lease);
        }
        Ok(self.reader.stream(request, cancel))
    }

    /// Record `event` as processed.
    pub async fn commit(&self, event: &RecordedEvent) -> Result<()> {
        self.checkpointer
            .write(&self.name, event.global_sequence)
            .await
    }
}
