//! SQLite Event Store Implementation
//!
//! This module implements the [`EventStore`] trait on top of SQLite.
//!
//! ## Usage
//!
//! ### File-Based
//! ```ignore
//! use eventhouse_store::{EventStore, SqliteEventStore};
//!
//! // Creates events.db (or opens it if it exists)
//! let store = SqliteEventStore::new("events.db").await?;
//! ```
//!
//! ### In-Memory (Testing)
//! ```ignore
//! let store = SqliteEventStore::new_in_memory().await?;
//! ```
//!
//! ## Implementation Details
//!
//! ### Write Serialization
//! SQLite allows one writer at a time. Every write transaction here starts
//! with a write statement (the sequence counter bump for appends, a no-op
//! touch of the group row for announces), so the write lock is taken up front
//! and a transaction never has to upgrade a read lock halfway through. The
//! busy timeout makes concurrent writers queue instead of failing.
//!
//! ### Connection Pool
//! - File databases use WAL mode: readers never block the single writer
//! - In-memory databases use a single, never-recycled connection, since every
//!   SQLite connection to `:memory:` opens its own private database
//!
//! ### Migrations
//! Run automatically on startup via `sqlx::migrate!`.
//!
//! ### Notifications
//! A successful append publishes its last global sequence number on an
//! in-process broadcast channel. Only readers in the same process are woken;
//! other processes sharing the file fall back to polling.

use crate::{
    config::StoreConfig,
    error::{is_unique_violation, Result, StoreError},
    types::*,
    EventStore,
};
use async_trait::async_trait;
use bytes::Bytes;
use eventhouse_core::{now_ms, Event, Metadata, Predicate, RecordedEvent, StreamId, VersionCheck};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::Row;
use std::num::NonZeroU32;
use std::path::Path;
use std::str::FromStr;
use tokio::sync::broadcast;
use tracing::{debug, info};

const SELECT_EVENTS: &str = "SELECT global_sequence, stream_type, stream_id, version, event_type, \
     payload, metadata, recorded_at FROM events";

const SELECT_LEASES: &str = "SELECT l.lease_id, l.group_name, g.size AS group_size, \
     l.member_index, l.leased_at, l.expires_at, l.last_action_at \
     FROM consumer_group_leases l JOIN consumer_groups g ON g.name = l.group_name";

/// SQLite-backed event store.
pub struct SqliteEventStore {
    pool: SqlitePool,
    notifications: broadcast::Sender<i64>,
}

impl SqliteEventStore {
    /// Open (or create) a database file at `path`.
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = StoreConfig::new(format!("sqlite://{}", path.as_ref().display()));
        Self::with_config(&config).await
    }

    /// Create a private in-memory database (for testing).
    pub async fn new_in_memory() -> Result<Self> {
        Self::with_config(&StoreConfig::new("sqlite::memory:")).await
    }

    pub async fn with_config(config: &StoreConfig) -> Result<Self> {
        let in_memory = config.database_url.contains(":memory:");

        let mut options = SqliteConnectOptions::from_str(&config.database_url)?
            .create_if_missing(true)
            .busy_timeout(config.busy_timeout_duration());

        let pool = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            options = options.journal_mode(SqliteJournalMode::Wal);
            SqlitePoolOptions::new()
                .max_connections(config.max_connections.max(1))
                .connect_with(options)
                .await?
        };

        sqlx::migrate!("./migrations").run(&pool).await?;

        info!(
            database_url = %config.database_url,
            in_memory,
            "SQLite event store ready"
        );

        let (notifications, _) = broadcast::channel(config.notification_capacity.max(1));

        Ok(Self {
            pool,
            notifications,
        })
    }

    /// The underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl EventStore for SqliteEventStore {
    async fn append(
        &self,
        stream: &StreamId,
        expected: VersionCheck,
        events: Vec<Event>,
    ) -> Result<i64> {
        if events.is_empty() {
            let current = self.stream_version(stream).await?;
            if !expected.matches(current) {
                return Err(conflict(stream, expected, current));
            }
            return Ok(current);
        }

        let metadata = encode_metadata(&events)?;
        let count = events.len() as i64;
        let now = now_ms();

        let mut tx = self.pool.begin().await?;

        // Reserve the sequence range first so the write lock is held from here on
        let last_sequence: i64 = sqlx::query_scalar(
            "UPDATE event_sequence SET value = value + ? WHERE id = 1 RETURNING value",
        )
        .bind(count)
        .fetch_one(&mut *tx)
        .await?;
        let first_sequence = last_sequence - count + 1;

        let current: i64 = sqlx::query_scalar(
            "SELECT version FROM streams WHERE stream_type = ? AND stream_id = ?",
        )
        .bind(&stream.stream_type)
        .bind(&stream.stream_id)
        .fetch_optional(&mut *tx)
        .await?
        .unwrap_or(0);

        if !expected.matches(current) {
            tx.rollback().await?;
            debug!(
                stream = %stream,
                expected = %expected,
                actual = current,
                "Append rejected: version conflict"
            );
            return Err(conflict(stream, expected, current));
        }

        let mut version = current;
        for (offset, (event, metadata)) in events.iter().zip(&metadata).enumerate() {
            version += 1;
            let inserted = sqlx::query(
                "INSERT INTO events (global_sequence, stream_type, stream_id, version, \
                 event_type, payload, metadata, recorded_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(first_sequence + offset as i64)
            .bind(&stream.stream_type)
            .bind(&stream.stream_id)
            .bind(version)
            .bind(&event.event_type)
            .bind(&event.payload[..])
            .bind(metadata.as_slice())
            .bind(now)
            .execute(&mut *tx)
            .await;

            if let Err(e) = inserted {
                if is_unique_violation(&e) {
                    return Err(conflict(stream, expected, current));
                }
                return Err(e.into());
            }
        }

        sqlx::query(
            "INSERT INTO streams (stream_type, stream_id, version, updated_at) VALUES (?, ?, ?, ?) \
             ON CONFLICT(stream_type, stream_id) DO UPDATE SET \
             version = excluded.version, updated_at = excluded.updated_at",
        )
        .bind(&stream.stream_type)
        .bind(&stream.stream_id)
        .bind(version)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(
            stream = %stream,
            version,
            first_sequence,
            last_sequence,
            "Appended events"
        );

        // No receivers is fine: nobody is tailing right now
        let _ = self.notifications.send(last_sequence);

        Ok(version)
    }

    async fn scan(
        &self,
        predicate: &Predicate,
        from: i64,
        limit: usize,
    ) -> Result<Vec<RecordedEvent>> {
        // SQLite treats a negative LIMIT as "no limit"
        let limit = if limit == 0 { -1 } else { limit as i64 };

        let rows = match predicate {
            Predicate::All => {
                sqlx::query(&format!(
                    "{} WHERE global_sequence >= ? ORDER BY global_sequence ASC LIMIT ?",
                    SELECT_EVENTS
                ))
                .bind(from)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            Predicate::ByType(stream_type) => {
                sqlx::query(&format!(
                    "{} WHERE stream_type = ? AND global_sequence >= ? \
                     ORDER BY global_sequence ASC LIMIT ?",
                    SELECT_EVENTS
                ))
                .bind(stream_type)
                .bind(from)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            Predicate::ByStream(stream) => {
                sqlx::query(&format!(
                    "{} WHERE stream_type = ? AND stream_id = ? AND version >= ? \
                     ORDER BY version ASC LIMIT ?",
                    SELECT_EVENTS
                ))
                .bind(&stream.stream_type)
                .bind(&stream.stream_id)
                .bind(from)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(row_to_event).collect()
    }

    async fn stream_version(&self, stream: &StreamId) -> Result<i64> {
        let version: Option<i64> = sqlx::query_scalar(
            "SELECT version FROM streams WHERE stream_type = ? AND stream_id = ?",
        )
        .bind(&stream.stream_type)
        .bind(&stream.stream_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(version.unwrap_or(0))
    }

    async fn latest_sequence(&self) -> Result<i64> {
        let latest: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(global_sequence), 0) FROM events")
            .fetch_one(&self.pool)
            .await?;
        Ok(latest)
    }

    fn subscribe(&self) -> broadcast::Receiver<i64> {
        self.notifications.subscribe()
    }

    async fn create_consumer_group(&self, name: &str, size: u32) -> Result<ConsumerGroup> {
        let size = NonZeroU32::new(size).ok_or_else(|| StoreError::InvalidGroupSize {
            group: name.to_string(),
            size: 0,
        })?;
        let now = now_ms();

        let result = sqlx::query("INSERT INTO consumer_groups (name, size, created_at) VALUES (?, ?, ?)")
            .bind(name)
            .bind(size.get() as i64)
            .bind(now)
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                return Err(StoreError::GroupAlreadyExists(name.to_string()))
            }
            Err(e) => return Err(e.into()),
        }

        info!(group = name, size = size.get(), "Created consumer group");

        Ok(ConsumerGroup {
            name: name.to_string(),
            size,
            created_at: now,
        })
    }

    async fn get_consumer_group(&self, name: &str) -> Result<Option<ConsumerGroup>> {
        let row = sqlx::query("SELECT name, size, created_at FROM consumer_groups WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| -> Result<ConsumerGroup> {
            let name: String = r.try_get("name")?;
            let size = group_size(&name, r.try_get("size")?)?;
            Ok(ConsumerGroup {
                name,
                size,
                created_at: r.try_get("created_at")?,
            })
        })
        .transpose()
    }

    async fn announce_lease(&self, group: &str, now_ms: i64, ttl_ms: i64) -> Result<Lease> {
        let mut tx = self.pool.begin().await?;

        // Touching the group row takes the write lock, serializing announces
        let size: Option<i64> =
            sqlx::query_scalar("UPDATE consumer_groups SET size = size WHERE name = ? RETURNING size")
                .bind(group)
                .fetch_optional(&mut *tx)
                .await?;
        let size = match size {
            Some(size) => group_size(group, size)?,
            None => return Err(StoreError::GroupNotFound(group.to_string())),
        };

        let active: Vec<i64> = sqlx::query_scalar(
            "SELECT member_index FROM consumer_group_leases WHERE group_name = ? AND expires_at >= ?",
        )
        .bind(group)
        .bind(now_ms)
        .fetch_all(&mut *tx)
        .await?;
        let active: Vec<u32> = active.into_iter().map(|index| index as u32).collect();

        let member_index =
            next_member_index(size, &active).ok_or_else(|| StoreError::CapacityExceeded {
                group: group.to_string(),
                size: size.get(),
            })?;

        let lease = Lease {
            lease_id: uuid::Uuid::new_v4().to_string(),
            group_name: group.to_string(),
            group_size: size,
            member_index,
            leased_at: now_ms,
            expires_at: now_ms + ttl_ms,
            last_action_at: now_ms,
        };

        sqlx::query(
            "INSERT INTO consumer_group_leases \
             (lease_id, group_name, member_index, leased_at, expires_at, last_action_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&lease.lease_id)
        .bind(&lease.group_name)
        .bind(lease.member_index as i64)
        .bind(lease.leased_at)
        .bind(lease.expires_at)
        .bind(lease.last_action_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(
            group,
            lease_id = %lease.lease_id,
            member_index,
            expires_at = lease.expires_at,
            "Granted member lease"
        );

        Ok(lease)
    }

    async fn renew_lease(&self, lease_id: &str, now_ms: i64, ttl_ms: i64) -> Result<i64> {
        let renewed: Option<i64> = sqlx::query_scalar(
            "UPDATE consumer_group_leases SET expires_at = ?, last_action_at = ? \
             WHERE lease_id = ? AND expires_at >= ? RETURNING expires_at",
        )
        .bind(now_ms + ttl_ms)
        .bind(now_ms)
        .bind(lease_id)
        .bind(now_ms)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(expires_at) = renewed {
            debug!(lease_id, expires_at, "Renewed lease");
            return Ok(expires_at);
        }

        let expired_at: Option<i64> =
            sqlx::query_scalar("SELECT expires_at FROM consumer_group_leases WHERE lease_id = ?")
                .bind(lease_id)
                .fetch_optional(&self.pool)
                .await?;

        match expired_at {
            Some(expired_at) => Err(StoreError::LeaseExpired {
                lease_id: lease_id.to_string(),
                expired_at,
            }),
            None => Err(StoreError::LeaseNotFound(lease_id.to_string())),
        }
    }

    async fn get_lease(&self, lease_id: &str) -> Result<Option<Lease>> {
        let row = sqlx::query(&format!("{} WHERE l.lease_id = ?", SELECT_LEASES))
            .bind(lease_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_lease).transpose()
    }

    async fn release_lease(&self, lease_id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM consumer_group_leases WHERE lease_id = ?")
            .bind(lease_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::LeaseNotFound(lease_id.to_string()));
        }

        info!(lease_id, "Released lease");
        Ok(())
    }

    async fn list_leases(&self, group: &str, now_ms: i64) -> Result<Vec<Lease>> {
        let rows = sqlx::query(&format!(
            "{} WHERE l.group_name = ? AND l.expires_at >= ? ORDER BY l.member_index ASC",
            SELECT_LEASES
        ))
        .bind(group)
        .bind(now_ms)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_lease).collect()
    }

    async fn read_checkpoint(&self, subscription: &str) -> Result<i64> {
        let sequence: Option<i64> = sqlx::query_scalar(
            "SELECT sequence_number FROM subscriptions_checkpoints WHERE subscription_name = ?",
        )
        .bind(subscription)
        .fetch_optional(&self.pool)
        .await?;

        Ok(sequence.unwrap_or(0))
    }

    async fn write_checkpoint(&self, subscription: &str, sequence_number: i64) -> Result<()> {
        sqlx::query(
            "INSERT INTO subscriptions_checkpoints (subscription_name, sequence_number, updated_at) \
             VALUES (?, ?, ?) \
             ON CONFLICT(subscription_name) DO UPDATE SET \
             sequence_number = excluded.sequence_number, updated_at = excluded.updated_at",
        )
        .bind(subscription)
        .bind(sequence_number)
        .bind(now_ms())
        .execute(&self.pool)
        .await?;

        debug!(subscription, sequence_number, "Wrote checkpoint");
        Ok(())
    }
}

pub(crate) fn conflict(stream: &StreamId, expected: VersionCheck, actual: i64) -> StoreError {
    StoreError::Conflict {
        stream: stream.to_string(),
        expected: match expected {
            VersionCheck::Exact(v) => v,
            VersionCheck::Any => actual,
        },
        actual,
    }
}

/// Encode every event's metadata before a transaction is opened.
pub(crate) fn encode_metadata(events: &[Event]) -> Result<Vec<Vec<u8>>> {
    events
        .iter()
        .map(|e| serde_json::to_vec(&e.metadata).map_err(StoreError::from))
        .collect()
}

pub(crate) fn group_size(group: &str, size: i64) -> Result<NonZeroU32> {
    u32::try_from(size)
        .ok()
        .and_then(NonZeroU32::new)
        .ok_or_else(|| StoreError::InvalidGroupSize {
            group: group.to_string(),
            size,
        })
}

fn row_to_event(row: &SqliteRow) -> Result<RecordedEvent> {
    let payload: Vec<u8> = row.try_get("payload")?;
    let metadata: Vec<u8> = row.try_get("metadata")?;

    Ok(RecordedEvent {
        stream: StreamId::new(
            row.try_get::<String, _>("stream_type")?,
            row.try_get::<String, _>("stream_id")?,
        ),
        version: row.try_get("version")?,
        global_sequence: row.try_get("global_sequence")?,
        event_type: row.try_get("event_type")?,
        payload: Bytes::from(payload),
        metadata: serde_json::from_slice::<Metadata>(&metadata)?,
        recorded_at: row.try_get("recorded_at")?,
    })
}

fn row_to_lease(row: &SqliteRow) -> Result<Lease> {
    let group_name: String = row.try_get("group_name")?;
    let group_size = group_size(&group_name, row.try_get("group_size")?)?;
    let member_index: i64 = row.try_get("member_index")?;

    Ok(Lease {
        lease_id: row.try_get("lease_id")?,
        group_name,
        group_size,
        member_index: member_index as u32,
        leased_at: row.try_get("leased_at")?,
        expires_at: row.try_get("expires_at")?,
        last_action_at: row.try_get("last_action_at")?,
    })
}
