//! EventHouse Store
//!
//! Durable storage for the EventHouse event-sourcing engine: the append-only
//! event log, consumer group member leases and subscription checkpoints.
//!
//! ## What Gets Stored
//!
//! | Table | Purpose |
//! |-------|---------|
//! | `events` | Every committed event, keyed by global sequence number |
//! | `streams` | Current version of each stream |
//! | `event_sequence` | Transactional counter for global sequence numbers |
//! | `consumer_groups` | Group name and fixed member count |
//! | `consumer_group_leases` | Member slot claims with expiry |
//! | `subscriptions_checkpoints` | Last processed sequence per subscription |
//!
//! ## Ordering Guarantees
//!
//! Global sequence numbers come from a single counter row that is incremented
//! inside the append transaction. The row stays locked until commit, so
//! appends commit in sequence order and a reader can never see sequence `n + 1`
//! while `n` is still in flight. A committed sequence number is never
//! assigned to another event. The counter increment rolls back together with
//! a failed append, so its numbers were never visible to any reader and the
//! committed sequence stays gap-free.
//!
//! ## Backends
//!
//! - [`SqliteEventStore`]: embedded, zero-config (default)
//! - `PostgresEventStore`: shared by many processes (feature `postgres`)
//!
//! Both run the schema migrations on startup. Pick one at runtime with
//! [`connect`].
//!
//! ## Usage Example
//!
//! ```ignore
//! use eventhouse_core::{Event, StreamId, VersionCheck};
//! use eventhouse_store::{EventStore, SqliteEventStore};
//!
//! let store = SqliteEventStore::new("events.db").await?;
//!
//! let order = StreamId::new("order", "42");
//! let version = store
//!     .append(&order, VersionCheck::Exact(0), vec![
//!         Event::new("order_placed", r#"{"amount":12}"#),
//!         Event::new("order_paid", "{}"),
//!     ])
//!     .await?;
//! assert_eq!(version, 2);
//! ```

pub mod config;
pub mod error;
pub mod repository;
pub mod store;
pub mod types;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use config::StoreConfig;
pub use error::{Result, StoreError};
pub use repository::Repository;
pub use store::SqliteEventStore;
pub use types::*;

#[cfg(feature = "postgres")]
pub use postgres::PostgresEventStore;

use async_trait::async_trait;
use eventhouse_core::{Event, Predicate, RecordedEvent, StreamId, VersionCheck};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Storage contract for the event log, leases and checkpoints.
///
/// Implementations only provide durable, ordered storage and the locking
/// needed for atomic allocation. Member index selection ([`next_member_index`])
/// and partition filtering live outside the backend.
///
/// All implementations are `Send + Sync` and meant to be shared as
/// `Arc<dyn EventStore>`.
#[async_trait]
pub trait EventStore: Send + Sync {
    // ============================================================
    // EVENT LOG
    // ============================================================

    /// Append `events` to `stream` as a single atomic unit.
    ///
    /// Each event gets the next stream version and a fresh global sequence
    /// number. `expected` is checked against the stream version before the
    /// batch; a multi-event append only needs to match that starting version.
    ///
    /// # Returns
    ///
    /// The stream version after the last appended event. An empty batch
    /// appends nothing and returns the current version.
    ///
    /// # Errors
    ///
    /// - `Conflict`: the stream is not at the expected version; nothing is written
    /// - `Serialization`: metadata could not be encoded
    /// - `Database`: backend failure; the whole batch is rolled back
    async fn append(
        &self,
        stream: &StreamId,
        expected: VersionCheck,
        events: Vec<Event>,
    ) -> Result<i64>;

    /// Read committed events matching `predicate`, in ascending order.
    ///
    /// `from` is a global sequence number for [`Predicate::All`] and
    /// [`Predicate::ByType`], and a stream version for [`Predicate::ByStream`].
    /// Both bounds are inclusive. `limit == 0` returns everything committed.
    async fn scan(&self, predicate: &Predicate, from: i64, limit: usize)
        -> Result<Vec<RecordedEvent>>;

    /// Current version of `stream` (0 if it has no events).
    async fn stream_version(&self, stream: &StreamId) -> Result<i64>;

    /// Highest committed global sequence number (0 if the store is empty).
    async fn latest_sequence(&self) -> Result<i64>;

    /// Receive the highest committed global sequence after each append.
    ///
    /// Notifications are wake-up hints only. A receiver may lag or miss some,
    /// so readers must poll the log rather than trust them for content.
    fn subscribe(&self) -> broadcast::Receiver<i64>;

    // ============================================================
    // CONSUMER GROUPS
    // ============================================================

    /// Provision a consumer group with `size` member slots.
    ///
    /// # Errors
    ///
    /// - `InvalidGroupSize`: size is zero
    /// - `GroupAlreadyExists`: the name is taken
    async fn create_consumer_group(&self, name: &str, size: u32) -> Result<ConsumerGroup>;

    async fn get_consumer_group(&self, name: &str) -> Result<Option<ConsumerGroup>>;

    // ============================================================
    // LEASES
    // ============================================================

    /// Claim the lowest free member slot of `group` until `now_ms + ttl_ms`.
    ///
    /// Serialized against concurrent announces for the same group, so two
    /// callers can never receive the same unexpired slot.
    ///
    /// # Errors
    ///
    /// - `GroupNotFound`: no such group
    /// - `CapacityExceeded`: every slot is held by an unexpired lease
    async fn announce_lease(&self, group: &str, now_ms: i64, ttl_ms: i64) -> Result<Lease>;

    /// Push the expiry of an unexpired lease to `now_ms + ttl_ms`.
    ///
    /// # Returns
    ///
    /// The new expiry timestamp.
    ///
    /// # Errors
    ///
    /// - `LeaseNotFound`: unknown or released lease
    /// - `LeaseExpired`: expiry already passed; the slot may belong to someone else
    async fn renew_lease(&self, lease_id: &str, now_ms: i64, ttl_ms: i64) -> Result<i64>;

    /// Look a lease up regardless of expiry.
    async fn get_lease(&self, lease_id: &str) -> Result<Option<Lease>>;

    /// Free a lease's slot immediately.
    ///
    /// # Errors
    ///
    /// - `LeaseNotFound`: unknown or already released lease
    async fn release_lease(&self, lease_id: &str) -> Result<()>;

    /// Unexpired leases of `group`, ordered by member index.
    async fn list_leases(&self, group: &str, now_ms: i64) -> Result<Vec<Lease>>;

    // ============================================================
    // CHECKPOINTS
    // ============================================================

    /// Last sequence number recorded for `subscription` (0 if none).
    async fn read_checkpoint(&self, subscription: &str) -> Result<i64>;

    /// Record `sequence_number` for `subscription`, overwriting any previous
    /// value. No monotonicity check is made.
    async fn write_checkpoint(&self, subscription: &str, sequence_number: i64) -> Result<()>;
}

/// Open the backend named by `config.database_url`.
///
/// `postgres://` URLs require the `postgres` feature; anything else is treated
/// as a SQLite URL.
pub async fn connect(config: &StoreConfig) -> Result<Arc<dyn EventStore>> {
    if config.is_postgres() {
        #[cfg(feature = "postgres")]
        {
            let store = PostgresEventStore::with_config(config).await?;
            return Ok(Arc::new(store));
        }

        #[cfg(not(feature = "postgres"))]
        return Err(StoreError::Config(
            "PostgreSQL URL given but the `postgres` feature is disabled".to_string(),
        ));
    }

    let store = SqliteEventStore::with_config(config).await?;
    Ok(Arc::new(store))
}
