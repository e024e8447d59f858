//! Stream Partitioning
//!
//! Maps a stream identifier onto a member index of a consumer group.
//!
//! ## Definition
//!
//! ```text
//! digest    = MD5(stream_id bytes)            // 128 bits
//! key       = u64::from_be_bytes(digest[0..8])
//! partition = key % group_size
//! ```
//!
//! Every consumer in a group must compute the same assignment for the same
//! stream, whatever process or release it runs in. Changing this function
//! reshuffles every stream across members and requires draining all groups
//! first.

use std::num::NonZeroU32;

/// Member index in `[0, group_size)` responsible for `stream_id`.
pub fn partition(stream_id: &str, group_size: NonZeroU32) -> u32 {
    let digest = md5::compute(stream_id.as_bytes());

    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest.0[..8]);
    let key = u64::from_be_bytes(prefix);

    (key % u64::from(group_size.get())) as u32
}
