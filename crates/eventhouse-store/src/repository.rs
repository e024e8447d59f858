//! Aggregate Repository
//!
//! Loads aggregates by folding their stream and saves their pending events
//! with an exact version expectation.
//!
//! ```ignore
//! let accounts: Repository<Account> = Repository::new(store.clone());
//!
//! let mut account = accounts.load("acc-1").await?.unwrap_or_else(|| Root::new(Account::default()));
//! account.record_that(Event::from_payload(&Deposited(10))?)?;
//!
//! match accounts.save(&mut account).await {
//!     Err(e) if e.is_conflict() => { /* reload and retry */ }
//!     other => other?,
//! }
//! ```

use crate::{error::Result, EventStore};
use eventhouse_core::{Aggregate, Predicate, Root, StreamId, VersionCheck};
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

/// Typed load/save access to aggregates of type `A`.
pub struct Repository<A> {
    store: Arc<dyn EventStore>,
    _aggregate: PhantomData<fn() -> A>,
}

impl<A> Clone for Repository<A> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            _aggregate: PhantomData,
        }
    }
}

impl<A: Aggregate + Default> Repository<A> {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self {
            store,
            _aggregate: PhantomData,
        }
    }

    /// Rebuild the aggregate with id `id`, or `None` if its stream is empty.
    pub async fn load(&self, id: &str) -> Result<Option<Root<A>>> {
        let stream = StreamId::new(A::TYPE, id);
        let history = self.store.scan(&Predicate::ByStream(stream), 1, 0).await?;

        if history.is_empty() {
            return Ok(None);
        }

        let root = Root::rehydrate(A::default(), &history)?;
        debug!(
            stream_type = A::TYPE,
            stream_id = id,
            version = root.version(),
            "Loaded aggregate"
        );
        Ok(Some(root))
    }

    /// Append the root's pending events.
    ///
    /// On success the pending buffer is drained and the root's version matches
    /// the stream. On failure (including `Conflict`) the pending events are
    /// kept so the caller can inspect them; the root should be reloaded before
    /// recording anything new.
    pub async fn save(&self, root: &mut Root<A>) -> Result<i64> {
        if root.pending().is_empty() {
            return Ok(root.version());
        }

        let stream = root.stream_id();
        let expected = root.expected_version();
        let events = root.pending().to_vec();

        let version = self
            .store
            .append(&stream, VersionCheck::Exact(expected), events)
            .await?;
        root.take_pending();

        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::SqliteEventStore;
    use eventhouse_core::{CoreError, Event};

    #[derive(Debug, Default)]
    struct Counter {
        id: String,
        total: i64,
    }

    impl Aggregate for Counter {
        const TYPE: &'static str = "counter";

        fn id(&self) -> String {
            self.id.clone()
        }

        fn apply(&mut self, event: &Event) -> eventhouse_core::Result<()> {
            match event.event_type.as_str() {
                "created" => {
                    self.id = String::from_utf8_lossy(&event.payload).into_owned();
                }
                "added" => {
                    let raw = String::from_utf8_lossy(&event.payload);
                    self.total += raw.parse::<i64>().map_err(|e| CoreError::Apply {
                        aggregate: Self::TYPE.to_string(),
                        event_type: event.event_type.clone(),
                        reason: e.to_string(),
                    })?;
                }
                other => return Err(CoreError::UnknownEventType(other.to_string())),
            }
            Ok(())
        }
    }

    async fn setup() -> Repository<Counter> {
        let store: Arc<dyn EventStore> = Arc::new(SqliteEventStore::new_in_memory().await.unwrap());
        Repository::new(store)
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let repo = setup().await;
        assert!(repo.load("c-1").await.unwrap().is_none());

        let mut root = Root::new(Counter::default());
        root.record_that(Event::new("created", "c-1")).unwrap();
        root.record_that(Event::new("added", "5")).unwrap();
        assert_eq!(repo.save(&mut root).await.unwrap(), 2);
        assert!(root.pending().is_empty());

        let mut loaded = repo.load("c-1").await.unwrap().unwrap();
        assert_eq!(loaded.version(), 2);
        assert_eq!(loaded.state().total, 5);

        loaded.record_that(Event::new("added", "3")).unwrap();
        assert_eq!(repo.save(&mut loaded).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_concurrent_writers_conflict() {
        let repo = setup().await;

        let mut root = Root::new(Counter::default());
        root.record_that(Event::new("created", "c-2")).unwrap();
        repo.save(&mut root).await.unwrap();

        let mut first = repo.load("c-2").await.unwrap().unwrap();
        let mut second = repo.load("c-2").await.unwrap().unwrap();

        first.record_that(Event::new("added", "1")).unwrap();
        second.record_that(Event::new("added", "2")).unwrap();

        repo.save(&mut first).await.unwrap();
        let err = repo.save(&mut second).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { expected: 1, actual: 2, .. }));
        assert_eq!(second.pending().len(), 1);

        let reloaded = repo.load("c-2").await.unwrap().unwrap();
        assert_eq!(reloaded.state().total, 1);
    }
}
