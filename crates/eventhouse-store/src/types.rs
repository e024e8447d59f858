//! Store Type Definitions
//!
//! ### ConsumerGroup
//! A named, fixed-size set of member slots. Provisioned administratively and
//! read-only to the lease protocol.
//!
//! ### Lease
//! A time-bounded claim on one member slot. At most one unexpired lease exists
//! per `(group, member_index)` at any instant.
//!
//! All timestamps are milliseconds since the Unix epoch.

use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;

/// A consumer group and its member count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerGroup {
    pub name: String,

    /// Number of member slots (immutable after creation)
    pub size: NonZeroU32,

    pub created_at: i64,
}

/// A member slot claimed by one consumer process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub lease_id: String,
    pub group_name: String,

    /// Size of the group the slot belongs to, needed for partition filtering
    pub group_size: NonZeroU32,

    /// Slot index in `[0, group_size)`
    pub member_index: u32,

    pub leased_at: i64,
    pub expires_at: i64,
    pub last_action_at: i64,
}

impl Lease {
    /// A lease is expired once `now` has passed `expires_at`.
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        self.expires_at < now_ms
    }

    /// Whether this lease's member is responsible for `stream_id`.
    pub fn owns(&self, stream_id: &str) -> bool {
        eventhouse_core::partition(stream_id, self.group_size) == self.member_index
    }
}

/// Lowest member index not held by an unexpired lease, if any slot is free.
///
/// `active` lists the member indices of the group's unexpired leases, in any
/// order. Backends call this while holding the group lock so that the answer
/// cannot be invalidated by a concurrent announce.
pub fn next_member_index(size: NonZeroU32, active: &[u32]) -> Option<u32> {
    (0..size.get()).find(|index| !active.contains(index))
}
