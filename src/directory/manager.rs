//! Directory Implementation
//!
//! The single authority over who is connected. Every membership change goes
//! through the write lock, so admit, identify and remove are serialized
//! against each other across all connections. Readers get snapshots.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::types::{AdmitError, DirectorySnapshot, RoleCount};
use crate::config::ConnectionLimits;
use crate::metrics::{reason, HubMetrics};
use crate::peer::{Peer, PeerProfile, Role, SendError};

#[derive(Default)]
struct Members {
    closed: bool,
    buckets: HashMap<Role, HashMap<String, Arc<Peer>>>,
}

impl Members {
    fn bucket(&self, role: Role) -> Option<&HashMap<String, Arc<Peer>>> {
        self.buckets.get(&role)
    }

    fn bucket_len(&self, role: Role) -> usize {
        self.bucket(role).map(HashMap::len).unwrap_or(0)
    }

    fn holds(&self, peer: &Peer) -> bool {
        self.bucket(peer.role())
            .and_then(|bucket| bucket.get(peer.name()))
            .map(|stored| stored.id() == peer.id())
            .unwrap_or(false)
    }

    fn check_room(&self, name: &str, role: Role, limits: &ConnectionLimits) -> Result<(), AdmitError> {
        if self
            .bucket(role)
            .map(|bucket| bucket.contains_key(name))
            .unwrap_or(false)
        {
            return Err(AdmitError::Duplicate {
                name: name.to_string(),
                role,
            });
        }

        let limit = limits.ceiling(role);
        if self.bucket_len(role) >= limit {
            return Err(AdmitError::CapacityExceeded { role, limit });
        }

        Ok(())
    }
}

/// Registry of connected peers grouped by role
pub struct Directory {
    limits: ConnectionLimits,
    members: RwLock<Members>,
    metrics: Arc<HubMetrics>,
}

impl Directory {
    pub fn new(limits: ConnectionLimits, metrics: Arc<HubMetrics>) -> Self {
        Self {
            limits,
            members: RwLock::new(Members::default()),
            metrics,
        }
    }

    pub fn limits(&self) -> &ConnectionLimits {
        &self.limits
    }

    /// Whether a peer called `name` is registered under `role`
    pub async fn exists(&self, name: &str, role: Role) -> bool {
        self.members
            .read()
            .await
            .bucket(role)
            .map(|bucket| bucket.contains_key(name))
            .unwrap_or(false)
    }

    /// Register a peer under its current role
    pub async fn admit(&self, peer: Arc<Peer>) -> Result<(), AdmitError> {
        let mut members = self.members.write().await;
        if members.closed {
            self.metrics.record_rejected(reason::SHUTDOWN);
            return Err(AdmitError::Closed);
        }

        let role = peer.role();
        if let Err(e) = members.check_room(peer.name(), role, &self.limits) {
            self.metrics.record_rejected(match e {
                AdmitError::CapacityExceeded { .. } => reason::CAPACITY,
                _ => reason::DUPLICATE,
            });
            return Err(e);
        }

        members
            .buckets
            .entry(role)
            .or_default()
            .insert(peer.name().to_string(), Arc::clone(&peer));
        self.metrics.record_admitted(role);
        debug!(peer = %peer.name(), %role, "peer admitted");
        Ok(())
    }

    /// Move a registered peer out of `Undefined` into `role` and record its profile
    pub async fn identify(
        &self,
        peer: &Arc<Peer>,
        role: Role,
        profile: PeerProfile,
    ) -> Result<(), AdmitError> {
        let mut members = self.members.write().await;
        if !members.holds(peer) {
            return Err(AdmitError::NotRegistered {
                name: peer.name().to_string(),
            });
        }
        if peer.is_identified() {
            return Err(AdmitError::AlreadyIdentified {
                name: peer.name().to_string(),
            });
        }

        let current = peer.role();
        if role != current {
            if let Err(e) = members.check_room(peer.name(), role, &self.limits) {
                self.metrics.record_rejected(match e {
                    AdmitError::CapacityExceeded { .. } => reason::CAPACITY,
                    _ => reason::DUPLICATE,
                });
                return Err(e);
            }

            if let Some(bucket) = members.buckets.get_mut(&current) {
                bucket.remove(peer.name());
            }
            members
                .buckets
                .entry(role)
                .or_default()
                .insert(peer.name().to_string(), Arc::clone(peer));
            peer.set_role(role);
            self.metrics.record_role_change(current, role);
        }

        peer.set_profile(profile);
        info!(peer = %peer.name(), from = %current, to = %role, "peer identified");
        Ok(())
    }

    /// Unregister a peer. Removing a peer that is not present is a no-op.
    ///
    /// Returns whether this call removed it.
    pub async fn remove(&self, peer: &Peer) -> bool {
        let mut members = self.members.write().await;
        if !members.holds(peer) {
            return false;
        }

        let role = peer.role();
        if let Some(bucket) = members.buckets.get_mut(&role) {
            bucket.remove(peer.name());
        }
        self.metrics.record_removed(role);
        debug!(peer = %peer.name(), %role, "peer removed");
        true
    }

    pub async fn find(&self, name: &str, role: Role) -> Option<Arc<Peer>> {
        self.members
            .read()
            .await
            .bucket(role)
            .and_then(|bucket| bucket.get(name))
            .cloned()
    }

    /// Snapshot of the peers registered under `role`, ordered by name
    pub async fn enumerate(&self, role: Role) -> Vec<Arc<Peer>> {
        let mut peers: Vec<Arc<Peer>> = self
            .members
            .read()
            .await
            .bucket(role)
            .map(|bucket| bucket.values().cloned().collect())
            .unwrap_or_default();
        peers.sort_by(|a, b| a.name().cmp(b.name()));
        peers
    }

    pub async fn count(&self, role: Role) -> usize {
        self.members.read().await.bucket_len(role)
    }

    pub async fn len(&self) -> usize {
        self.members
            .read()
            .await
            .buckets
            .values()
            .map(HashMap::len)
            .sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn snapshot(&self) -> DirectorySnapshot {
        let members = self.members.read().await;
        let roles: Vec<RoleCount> = Role::ALL
            .into_iter()
            .map(|role| RoleCount {
                role,
                count: members.bucket_len(role),
                limit: self.limits.ceiling(role),
            })
            .collect();

        let mut peers: Vec<_> = members
            .buckets
            .values()
            .flat_map(|bucket| bucket.values())
            .map(|peer| peer.summary())
            .collect();
        peers.sort_by(|a, b| (a.role, &a.name).cmp(&(b.role, &b.name)));

        DirectorySnapshot {
            total: peers.len(),
            roles,
            peers,
        }
    }

    /// Queue `message` for every peer of `role` without waiting.
    ///
    /// Returns how many peers accepted it.
    pub async fn broadcast(&self, role: Role, message: Bytes) -> usize {
        let peers = self.enumerate(role).await;
        let mut delivered = 0;
        for peer in peers {
            match peer.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(SendError::QueueFull) => {
                    self.metrics.record_dropped();
                    warn!(peer = %peer.name(), %role, "outbound queue full, broadcast dropped");
                }
                Err(e) => debug!(peer = %peer.name(), %role, "broadcast skipped: {}", e),
            }
        }
        delivered
    }

    /// Stop admitting and hand back every registered peer.
    pub async fn close(&self) -> Vec<Arc<Peer>> {
        let mut members = self.members.write().await;
        members.closed = true;
        members
            .buckets
            .values()
            .flat_map(|bucket| bucket.values().cloned())
            .collect()
    }

    pub async fn is_closed(&self) -> bool {
        self.members.read().await.closed
    }
}
