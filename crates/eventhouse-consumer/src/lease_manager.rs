//! Lease Manager - Consumer Group Membership
//!
//! A consumer group has a fixed number of member slots. Each consuming process
//! claims one slot with a time-bounded lease and then only handles the streams
//! that partition onto its slot. Leases rather than permanent assignments let
//! a crashed member's slot be reclaimed without any failure detector: it simply
//! expires.
//!
//! ## Slot Lifecycle
//!
//! ```text
//!            announce              renew (resets expiry)
//!   free ─────────────▶ leased ◀──────────────┐
//!    ▲                    │ ───────────────────┘
//!    │  expiry / release  │
//!    └────────────────────┘
//! ```
//!
//! ## Losing the Lease
//!
//! If a renewal finds the lease expired (or gone), the slot may already belong
//! to another process. The manager forgets the lease and the caller must
//! announce again; it must not keep consuming under the old member index.
//! Delivery across such a handover is at-least-once.
//!
//! ## Example
//!
//! ```ignore
//! let manager = LeaseManager::new("projections", store.clone(), ConsumerConfig::default());
//! let lease = manager.announce().await?;
//! manager.start_renewal_task().await?;
//!
//! // ... consume with `lease` ...
//!
//! manager.release().await?;
//! ```

use crate::config::ConsumerConfig;
use crate::error::{ConsumerError, Result};
use eventhouse_core::now_ms;
use eventhouse_store::{EventStore, Lease, StoreError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Holds this process's membership in one consumer group.
pub struct LeaseManager {
    group: String,
    store: Arc<dyn EventStore>,
    config: ConsumerConfig,
    lease: Arc<RwLock<Option<Lease>>>,
    renewal_handle: Arc<RwLock<Option<JoinHandle<()>>>>,
}

impl LeaseManager {
    pub fn new(group: impl Into<String>, store: Arc<dyn EventStore>, config: ConsumerConfig) -> Self {
        Self {
            group: group.into(),
            store,
            config,
            lease: Arc::new(RwLock::new(None)),
            renewal_handle: Arc::new(RwLock::new(None)),
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// Claim a member slot.
    ///
    /// A lease already held by this manager is released first, so one manager
    /// never occupies two slots.
    ///
    /// # Errors
    ///
    /// - `GroupNotFound`: the group has not been provisioned
    /// - `CapacityExceeded`: every slot is held by an unexpired lease
    /// - `Database`: releasing the previous lease failed; that lease is kept
    pub async fn announce(&self) -> Result<Lease> {
        let previous = self.lease.write().await.take();
        if let Some(previous) = previous {
            match self.store.release_lease(&previous.lease_id).await {
                Ok(()) => {}
                Err(StoreError::LeaseNotFound(_)) => {
                    debug!(
                        group = %self.group,
                        lease_id = %previous.lease_id,
                        "Previous lease already gone"
                    );
                }
                Err(e) => {
                    *self.lease.write().await = Some(previous);
                    return Err(e.into());
                }
            }
        }

        let lease = self
            .store
            .announce_lease(&self.group, now_ms(), self.config.lease_ttl_ms)
            .await?;

        *self.lease.write().await = Some(lease.clone());

        info!(
            group = %self.group,
            lease_id = %lease.lease_id,
            member_index = lease.member_index,
            group_size = lease.group_size.get(),
            expires_at = lease.expires_at,
            "Joined consumer group"
        );

        Ok(lease)
    }

    /// Extend the held lease by one TTL from now.
    ///
    /// # Returns
    ///
    /// The new expiry timestamp.
    ///
    /// # Errors
    ///
    /// - `NotAnnounced`: no lease is held
    /// - `LeaseExpired` / `LeaseNotFound`: the slot was lost; the lease is
    ///   forgotten and the caller must announce again
    pub async fn renew(&self) -> Result<i64> {
        renew_held_lease(&self.group, &self.store, &self.lease, self.config.lease_ttl_ms).await
    }

    /// Stop renewing and free the slot for other members.
    pub async fn release(&self) -> Result<()> {
        self.stop_renewal_task().await?;

        let lease = self
            .lease
            .write()
            .await
            .take()
            .ok_or_else(|| ConsumerError::NotAnnounced(self.group.clone()))?;

        self.store.release_lease(&lease.lease_id).await?;

        info!(
            group = %self.group,
            lease_id = %lease.lease_id,
            member_index = lease.member_index,
            "Left consumer group"
        );

        Ok(())
    }

    /// The held lease, if any and not yet past its expiry.
    pub async fn current_lease(&self) -> Option<Lease> {
        let now = now_ms();
        self.lease
            .read()
            .await
            .as_ref()
            .filter(|lease| !lease.is_expired_at(now))
            .cloned()
    }

    /// Start renewing the held lease every `renewal_interval`.
    ///
    /// The task stops by itself once the lease is lost.
    pub async fn start_renewal_task(&self) -> Result<()> {
        let task = LeaseRenewalTask {
            group: self.group.clone(),
            store: Arc::clone(&self.store),
            lease: Arc::clone(&self.lease),
            ttl_ms: self.config.lease_ttl_ms,
            interval: self.config.renewal_interval_duration(),
        };

        let handle = tokio::spawn(async move {
            task.run().await;
        });

        if let Some(previous) = self.renewal_handle.write().await.replace(handle) {
            previous.abort();
        }

        info!(
            group = %self.group,
            interval_ms = self.config.renewal_interval_ms,
            "Lease renewal task started"
        );

        Ok(())
    }

    pub async fn stop_renewal_task(&self) -> Result<()> {
        let mut handle_guard = self.renewal_handle.write().await;

        if let Some(handle) = handle_guard.take() {
            handle.abort();
            let _ = handle.await;

            info!(group = %self.group, "Lease renewal task stopped");
        }

        Ok(())
    }
}

async fn renew_held_lease(
    group: &str,
    store: &Arc<dyn EventStore>,
    slot: &RwLock<Option<Lease>>,
    ttl_ms: i64,
) -> Result<i64> {
    let lease_id = match slot.read().await.as_ref() {
        Some(lease) => lease.lease_id.clone(),
        None => return Err(ConsumerError::NotAnnounced(group.to_string())),
    };

    let now = now_ms();
    match store.renew_lease(&lease_id, now, ttl_ms).await {
        Ok(expires_at) => {
            if let Some(lease) = slot.write().await.as_mut() {
                if lease.lease_id == lease_id {
                    lease.expires_at = expires_at;
                    lease.last_action_at = now;
                }
            }
            Ok(expires_at)
        }
        Err(e @ (StoreError::LeaseExpired { .. } | StoreError::LeaseNotFound(_))) => {
            warn!(
                group,
                lease_id = %lease_id,
                error = %e,
                "Lease lost, member must announce again"
            );
            let mut guard = slot.write().await;
            if guard.as_ref().map(|l| l.lease_id == lease_id).unwrap_or(false) {
                *guard = None;
            }
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}

/// Background task renewing one lease.
struct LeaseRenewalTask {
    group: String,
    store: Arc<dyn EventStore>,
    lease: Arc<RwLock<Option<Lease>>>,
    ttl_ms: i64,
    interval: Duration,
}

impl LeaseRenewalTask {
    async fn run(self) {
        let mut failure_count: u64 = 0;

        loop {
            tokio::time::sleep(self.interval).await;

            match renew_held_lease(&self.group, &self.store, &self.lease, self.ttl_ms).await {
                Ok(expires_at) => {
                    failure_count = 0;
                    debug!(group = %self.group, expires_at, "Lease renewed");
                }
                Err(e) if e.is_lease_lost() => {
                    info!(group = %self.group, "Lease renewal task exiting: lease lost");
                    break;
                }
                Err(e) => {
                    // Transient: keep trying until the lease actually lapses
                    failure_count += 1;
                    error!(
                        group = %self.group,
                        error = %e,
                        failure_count,
                        "Lease renewal failed"
                    );
                }
            }
        }
    }
}
