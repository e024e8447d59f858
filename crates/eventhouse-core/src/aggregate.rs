//! Aggregate Roots
//!
//! An aggregate is domain state rebuilt by folding its stream's events in
//! order. The domain type implements [`Aggregate`]; [`Root`] wraps it and
//! tracks what the store needs to append safely:
//!
//! - the version the aggregate was loaded at (the optimistic concurrency
//!   expectation for the next append)
//! - the events recorded since then, not yet appended
//!
//! ```ignore
//! let mut root = Root::new(Account::default());
//! root.record_that(Event::from_payload(&Opened { id: "acc-1".into() })?)?;
//! root.record_that(Event::from_payload(&Deposited(100))?)?;
//!
//! let (expected, events) = root.take_pending();
//! store.append(&root.stream_id(), VersionCheck::Exact(expected), events).await?;
//! ```

use crate::error::Result;
use crate::event::{Event, RecordedEvent, StreamId};

/// Domain state built from events.
pub trait Aggregate: Send + Sync {
    /// Stream type under which instances are stored.
    const TYPE: &'static str;

    /// Identifier of this instance within [`Aggregate::TYPE`].
    fn id(&self) -> String;

    /// Apply one event to the state.
    ///
    /// Must be free of side effects beyond mutating `self`.
    fn apply(&mut self, event: &Event) -> Result<()>;
}

/// Version tracking and pending-event buffer around an [`Aggregate`].
#[derive(Debug, Clone)]
pub struct Root<A> {
    aggregate: A,
    version: i64,
    pending: Vec<Event>,
}

impl<A: Aggregate> Root<A> {
    /// Wrap a fresh aggregate that has no stored history (version 0).
    pub fn new(aggregate: A) -> Self {
        Self {
            aggregate,
            version: 0,
            pending: Vec::new(),
        }
    }

    /// Rebuild an aggregate from its stored events, in version order.
    pub fn rehydrate<'a, I>(mut aggregate: A, events: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a RecordedEvent>,
    {
        let mut version = 0;
        for recorded in events {
            aggregate.apply(&recorded.event())?;
            version = recorded.version;
        }

        Ok(Self {
            aggregate,
            version,
            pending: Vec::new(),
        })
    }

    /// Apply `event` and buffer it for the next append.
    ///
    /// Nothing is buffered if `apply` fails.
    pub fn record_that(&mut self, event: Event) -> Result<()> {
        self.aggregate.apply(&event)?;
        self.pending.push(event);
        self.version += 1;
        Ok(())
    }

    /// Current version, including pending events.
    pub fn version(&self) -> i64 {
        self.version
    }

    /// Version the stream is expected to be at before pending events are appended.
    pub fn expected_version(&self) -> i64 {
        self.version - self.pending.len() as i64
    }

    pub fn pending(&self) -> &[Event] {
        &self.pending
    }

    /// Drain pending events along with the version they must be appended at.
    pub fn take_pending(&mut self) -> (i64, Vec<Event>) {
        let expected = self.expected_version();
        (expected, std::mem::take(&mut self.pending))
    }

    pub fn stream_id(&self) -> StreamId {
        StreamId::new(A::TYPE, self.aggregate.id())
    }

    pub fn state(&self) -> &A {
        &self.aggregate
    }

    pub fn into_inner(self) -> A {
        self.aggregate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::event::Metadata;
    use crate::registry::Payload;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct Opened {
        id: String,
    }

    impl Payload for Opened {
        const NAME: &'static str = "opened";
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Deposited(i64);

    impl Payload for Deposited {
        const NAME: &'static str = "deposited";
    }

    #[derive(Debug, Default)]
    struct Account {
        id: String,
        balance: i64,
    }

    impl Aggregate for Account {
        const TYPE: &'static str = "account";

        fn id(&self) -> String {
            self.id.clone()
        }

        fn apply(&mut self, event: &Event) -> Result<()> {
            if event.event_type == Opened::NAME {
                self.id = event.decode::<Opened>()?.id;
            } else if event.event_type == Deposited::NAME {
                let Deposited(amount) = event.decode()?;
                if amount <= 0 {
                    return Err(CoreError::Apply {
                        aggregate: Self::TYPE.to_string(),
                        event_type: event.event_type.clone(),
                        reason: "deposit must be positive".to_string(),
                    });
                }
                self.balance += amount;
            } else {
                return Err(CoreError::UnknownEventType(event.event_type.clone()));
            }
            Ok(())
        }
    }

    fn recorded(version: i64, event: Event) -> RecordedEvent {
        RecordedEvent {
            stream: StreamId::new("account", "acc-1"),
            version,
            global_sequence: version + 10,
            event_type: event.event_type,
            payload: event.payload,
            metadata: Metadata::new(),
            recorded_at: 0,
        }
    }

    #[test]
    fn test_record_buffers_and_bumps_version() {
        let mut root = Root::new(Account::default());
        root.record_that(Event::from_payload(&Opened { id: "acc-1".into() }).unwrap())
            .unwrap();
        root.record_that(Event::from_payload(&Deposited(50)).unwrap())
            .unwrap();

        assert_eq!(root.version(), 2);
        assert_eq!(root.expected_version(), 0);
        assert_eq!(root.state().balance, 50);
        assert_eq!(root.stream_id(), StreamId::new("account", "acc-1"));

        let (expected, events) = root.take_pending();
        assert_eq!(expected, 0);
        assert_eq!(events.len(), 2);
        assert!(root.pending().is_empty());
        assert_eq!(root.expected_version(), 2);
    }

    #[test]
    fn test_failed_apply_records_nothing() {
        let mut root = Root::new(Account::default());
        let err = root
            .record_that(Event::from_payload(&Deposited(-5)).unwrap())
            .unwrap_err();

        assert!(matches!(err, CoreError::Apply { .. }));
        assert_eq!(root.version(), 0);
        assert!(root.pending().is_empty());
    }

    #[test]
    fn test_rehydrate_from_history() {
        let history = vec![
            recorded(1, Event::from_payload(&Opened { id: "acc-1".into() }).unwrap()),
            recorded(2, Event::from_payload(&Deposited(10)).unwrap()),
            recorded(3, Event::from_payload(&Deposited(5)).unwrap()),
        ];

        let mut root = Root::rehydrate(Account::default(), &history).unwrap();
        assert_eq!(root.version(), 3);
        assert_eq!(root.state().balance, 15);

        root.record_that(Event::from_payload(&Deposited(1)).unwrap())
            .unwrap();
        assert_eq!(root.take_pending().0, 3);
    }
}
