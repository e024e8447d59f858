//! Stream Reader
//!
//! Turns repeated [`EventStore::scan`] calls into a lazy, ordered stream of
//! committed events.
//!
//! ## Modes
//!
//! - **Catch-up**: the read horizon (latest global sequence, or the stream's
//!   version for a per-stream read) is captured on the first fetch. The stream
//!   ends once everything up to that horizon has been produced. Resume later by
//!   starting from the last processed position plus one.
//! - **Live**: when no more events are committed, the stream waits for an
//!   append notification or the refresh timeout, whichever comes first, and
//!   polls again. Notifications only shorten the wait; correctness never
//!   depends on receiving them.
//!
//! ## Partitioned Reads
//!
//! With a lease attached, the lease is re-checked against the store before
//! every batch and only events whose stream partitions onto the lease's member
//! index are produced. An expired or released lease yields a single error item
//! and ends the stream: the member no longer owns its partition.
//!
//! ## Cancellation
//!
//! Cancelling the token ends the stream without an error. An in-flight scan is
//! dropped, returning its connection to the pool.
//!
//! ```ignore
//! let reader = StreamReader::new(store.clone(), ConsumerConfig::default());
//! let cancel = CancellationToken::new();
//!
//! let mut events = reader.stream(
//!     StreamRequest::by_type("order").from(checkpoint + 1).lease(lease).live(),
//!     cancel.clone(),
//! );
//! while let Some(event) = events.next().await {
//!     let event = event?;
//!     // handle, then checkpoint event.global_sequence
//! }
//! ```

use crate::config::ConsumerConfig;
use crate::error::Result;
use eventhouse_core::{now_ms, Predicate, RecordedEvent, StreamId};
use eventhouse_store::{EventStore, Lease, StoreError};
use futures::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Ordered, cancellable stream of committed events.
pub type EventStream = BoxStream<'static, Result<RecordedEvent>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StreamMode {
    /// Stop at the horizon captured when reading starts
    #[default]
    CatchUp,

    /// Keep waiting for new appends until cancelled
    Live,
}

/// What to read and how.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub predicate: Predicate,

    /// First position to produce (global sequence, or version for `ByStream`)
    pub from: i64,

    /// Overrides the configured batch size
    pub batch_size: Option<usize>,

    /// Restricts the stream to the lease's partition
    pub lease: Option<Lease>,

    pub mode: StreamMode,
}

impl StreamRequest {
    pub fn new(predicate: Predicate) -> Self {
        Self {
            predicate,
            from: 0,
            batch_size: None,
            lease: None,
            mode: StreamMode::CatchUp,
        }
    }

    pub fn all() -> Self {
        Self::new(Predicate::All)
    }

    pub fn by_type(stream_type: impl Into<String>) -> Self {
        Self::new(Predicate::ByType(stream_type.into()))
    }

    pub fn by_stream(stream: StreamId) -> Self {
        Self::new(Predicate::ByStream(stream))
    }

    pub fn from(mut self, position: i64) -> Self {
        self.from = position;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn lease(mut self, lease: Lease) -> Self {
        self.lease = Some(lease);
        self
    }

    pub fn mode(mut self, mode: StreamMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn live(self) -> Self {
        self.mode(StreamMode::Live)
    }
}

/// Builds event streams over a shared store.
#[derive(Clone)]
pub struct StreamReader {
    store: Arc<dyn EventStore>,
    config: ConsumerConfig,
}

impl StreamReader {
    pub fn new(store: Arc<dyn EventStore>, config: ConsumerConfig) -> Self {
        Self { store, config }
    }

    pub fn stream(&self, request: StreamRequest, cancel: CancellationToken) -> EventStream {
        // Subscribe before the first scan so no append can slip in between
        let notifications = match request.mode {
            StreamMode::Live => Some(self.store.subscribe()),
            StreamMode::CatchUp => None,
        };

        // A zero batch would mean an unbounded scan
        let batch_size = request.batch_size.unwrap_or(self.config.batch_size).max(1);

        debug!(
            predicate = ?request.predicate,
            from = request.from,
            batch_size,
            mode = ?request.mode,
            member_index = request.lease.as_ref().map(|l| l.member_index),
            "Opening event stream"
        );

        let state = ReadState {
            store: Arc::clone(&self.store),
            predicate: request.predicate,
            lease: request.lease,
            mode: request.mode,
            batch_size,
            refresh: self.config.refresh_timeout_duration(),
            cursor: request.from,
            horizon: None,
            buffer: VecDeque::new(),
            notifications,
            cancel,
            finished: false,
        };

        // Fused so polling after the end keeps returning `None`
        Box::pin(futures::stream::unfold(state, ReadState::next).fuse())
    }

    /// Stream the events of `lease`'s partition.
    pub fn stream_group(
        &self,
        lease: Lease,
        predicate: Predicate,
        from: i64,
        mode: StreamMode,
        cancel: CancellationToken,
    ) -> EventStream {
        self.stream(
            StreamRequest::new(predicate).from(from).lease(lease).mode(mode),
            cancel,
        )
    }
}

enum Wake {
    Cancelled,
    Notified(Option<RecvError>),
    Timeout,
}

struct ReadState {
    store: Arc<dyn EventStore>,
    predicate: Predicate,
    lease: Option<Lease>,
    mode: StreamMode,
    batch_size: usize,
    refresh: Duration,

    /// Next position to scan from
    cursor: i64,

    /// Catch-up end position, captured on the first fetch
    horizon: Option<i64>,

    buffer: VecDeque<RecordedEvent>,
    notifications: Option<broadcast::Receiver<i64>>,
    cancel: CancellationToken,
    finished: bool,
}

impl ReadState {
    async fn next(mut self) -> Option<(Result<RecordedEvent>, Self)> {
        loop {
            if self.finished {
                return None;
            }
            if self.cancel.is_cancelled() {
                debug!(cursor = self.cursor, "Event stream cancelled");
                return None;
            }
            if let Some(event) = self.buffer.pop_front() {
                return Some((Ok(event), self));
            }

            let cancel = self.cancel.clone();
            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(cursor = self.cursor, "Event stream cancelled during fetch");
                    return None;
                }
                fetched = self.fetch() => fetched,
            };

            match fetched {
                Ok(true) => continue,
                Ok(false) => match self.mode {
                    StreamMode::CatchUp => {
                        debug!(cursor = self.cursor, horizon = ?self.horizon, "Caught up");
                        return None;
                    }
                    StreamMode::Live => {
                        if !self.wait_for_append().await {
                            debug!(cursor = self.cursor, "Event stream cancelled while tailing");
                            return None;
                        }
                    }
                },
                Err(e) => {
                    warn!(cursor = self.cursor, error = %e, "Event stream failed");
                    self.finished = true;
                    return Some((Err(e), self));
                }
            }
        }
    }

    /// Scan the next batch into the buffer.
    ///
    /// Returns `false` when nothing is left to read right now.
    async fn fetch(&mut self) -> Result<bool> {
        let lease = match &self.lease {
            Some(held) => Some(self.validate_lease(held).await?),
            None => None,
        };

        if self.mode == StreamMode::CatchUp && self.horizon.is_none() {
            self.horizon = Some(self.read_horizon().await?);
        }
        if let Some(horizon) = self.horizon {
            if self.cursor > horizon {
                return Ok(false);
            }
        }

        let rows = self
            .store
            .scan(&self.predicate, self.cursor, self.batch_size)
            .await?;
        let Some(last) = rows.last() else {
            return Ok(false);
        };
        self.cursor = self.predicate.position_of(last) + 1;

        let scanned = rows.len();
        let horizon = self.horizon;
        let predicate = &self.predicate;
        self.buffer.extend(
            rows.into_iter()
                .filter(|e| horizon.map_or(true, |h| predicate.position_of(e) <= h))
                .filter(|e| lease.as_ref().map_or(true, |l| l.owns(&e.stream.stream_id))),
        );

        debug!(
            scanned,
            kept = self.buffer.len(),
            cursor = self.cursor,
            "Fetched batch"
        );

        Ok(true)
    }

    /// The lease as currently stored, if it is still valid.
    async fn validate_lease(&self, held: &Lease) -> Result<Lease> {
        let lease = self
            .store
            .get_lease(&held.lease_id)
            .await?
            .ok_or_else(|| StoreError::LeaseNotFound(held.lease_id.clone()))?;

        if lease.is_expired_at(now_ms()) {
            return Err(StoreError::LeaseExpired {
                lease_id: lease.lease_id,
                expired_at: lease.expires_at,
            }
            .into());
        }

        Ok(lease)
    }

    async fn read_horizon(&self) -> Result<i64> {
        let horizon = match &self.predicate {
            Predicate::ByStream(stream) => self.store.stream_version(stream).await?,
            Predicate::All | Predicate::ByType(_) => self.store.latest_sequence().await?,
        };
        Ok(horizon)
    }

    /// Wait for an append notification or the refresh timeout.
    ///
    /// Returns `false` if the stream was cancelled meanwhile.
    async fn wait_for_append(&mut self) -> bool {
        let cancel = self.cancel.clone();
        let refresh = self.refresh;

        let wake = match self.notifications.as_mut() {
            Some(rx) => tokio::select! {
                _ = cancel.cancelled() => Wake::Cancelled,
                received = rx.recv() => Wake::Notified(received.err()),
                _ = tokio::time::sleep(refresh) => Wake::Timeout,
            },
            None => tokio::select! {
                _ = cancel.cancelled() => Wake::Cancelled,
                _ = tokio::time::sleep(refresh) => Wake::Timeout,
            },
        };

        match wake {
            Wake::Cancelled => false,
            Wake::Notified(None) | Wake::Timeout => true,
            Wake::Notified(Some(RecvError::Lagged(skipped))) => {
                debug!(skipped, "Append notifications lagged, polling");
                true
            }
            Wake::Notified(Some(RecvError::Closed)) => {
                // Fall back to polling on the refresh timeout alone
                self.notifications = None;
                true
            }
        }
    }
}
