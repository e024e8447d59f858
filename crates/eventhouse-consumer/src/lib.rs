//! EventHouse Consumer
//!
//! Reading side of EventHouse: consumer group membership, partitioned event
//! streams and subscription checkpoints.
//!
//! ## Components
//!
//! - [`LeaseManager`]: claims a member slot in a consumer group and keeps it
//!   alive with a background renewal task
//! - [`StreamReader`]: catch-up and live-tail event streams, optionally
//!   restricted to one member's partition
//! - [`Checkpointer`] / [`Subscription`]: durable "processed up to" markers
//!
//! ## Consumer Group Example
//!
//! ```ignore
//! use eventhouse_consumer::{ConsumerConfig, LeaseManager, StreamMode, StreamReader};
//! use futures::StreamExt;
//!
//! let config = ConsumerConfig::from_env()?;
//! let leases = LeaseManager::new("projections", store.clone(), config.clone());
//! let lease = leases.announce().await?;
//! leases.start_renewal_task().await?;
//!
//! let reader = StreamReader::new(store.clone(), config);
//! let mut events = reader.stream_group(lease, Predicate::All, 0, StreamMode::Live, cancel);
//! while let Some(event) = events.next().await {
//!     match event {
//!         Ok(event) => handle(event).await?,
//!         Err(e) if e.is_lease_lost() => break, // announce again
//!         Err(e) => return Err(e.into()),
//!     }
//! }
//! ```

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod lease_manager;
pub mod reader;

pub use checkpoint::{Checkpointer, Subscription};
pub use config::ConsumerConfig;
pub use error::{ConsumerError, Result};
pub use lease_manager::LeaseManager;
pub use reader::{EventStream, StreamMode, StreamReader, StreamRequest};

pub use tokio_util::sync::CancellationToken;
