//! Peer Record
//!
//! One connected party. The transport itself never lives here: it is split
//! between the two pumps, which are the only code that touches it. What the
//! record holds is the producer side of the outbound queue, the termination
//! signal for the outbound pump, and the metadata other components read.

use bytes::Bytes;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::types::{AccessMode, PeerMeta, PeerProfile, Role, SendError, TransportKind};
use crate::config::KeepaliveConfig;

/// Consumer side of a peer's outbound queue, owned by its outbound pump
pub type OutboundReceiver = mpsc::Receiver<Bytes>;

/// In-memory descriptor of one connected peer
#[derive(Debug)]
pub struct Peer {
    id: u64,
    name: String,
    kind: TransportKind,
    meta: PeerMeta,
    role: AtomicU8,
    identified: AtomicBool,
    profile: OnceLock<PeerProfile>,
    outbound: Mutex<Option<mpsc::Sender<Bytes>>>,
    send_timeout: Duration,
    quit: CancellationToken,
    connected_at: Instant,
    dropped_messages: AtomicU64,
}

impl Peer {
    /// Create a peer in role `Undefined` together with its queue receiver
    pub fn new(
        id: u64,
        name: impl Into<String>,
        kind: TransportKind,
        meta: PeerMeta,
        keepalive: &KeepaliveConfig,
    ) -> (Arc<Self>, OutboundReceiver) {
        let (tx, rx) = mpsc::channel(keepalive.send_queue_capacity);
        let peer = Self {
            id,
            name: name.into(),
            kind,
            meta,
            role: AtomicU8::new(Role::Undefined as u8),
            identified: AtomicBool::new(false),
            profile: OnceLock::new(),
            outbound: Mutex::new(Some(tx)),
            send_timeout: keepalive.send_timeout,
            quit: CancellationToken::new(),
            connected_at: Instant::now(),
            dropped_messages: AtomicU64::new(0),
        };
        (Arc::new(peer), rx)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    pub fn meta(&self) -> &PeerMeta {
        &self.meta
    }

    pub fn addr(&self) -> Option<SocketAddr> {
        self.meta.addr
    }

    pub fn role(&self) -> Role {
        Role::from_u8(self.role.load(Ordering::Acquire))
    }

    /// Only the directory moves a peer between roles, under its write lock.
    pub(crate) fn set_role(&self, role: Role) {
        self.role.store(role as u8, Ordering::Release);
    }

    pub fn is_identified(&self) -> bool {
        self.identified.load(Ordering::Acquire)
    }

    /// Record the identification profile. Returns false if one was already set.
    pub(crate) fn set_profile(&self, profile: PeerProfile) -> bool {
        if self.profile.set(profile).is_err() {
            return false;
        }
        self.identified.store(true, Ordering::Release);
        true
    }

    pub fn profile(&self) -> Option<&PeerProfile> {
        self.profile.get()
    }

    pub fn mode(&self) -> AccessMode {
        self.profile().map(|p| p.mode).unwrap_or_default()
    }

    pub fn connected_for(&self) -> Duration {
        self.connected_at.elapsed()
    }

    pub fn dropped_messages(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    fn sender(&self) -> Result<mpsc::Sender<Bytes>, SendError> {
        if !self.mode().accepts_outbound() {
            return Err(SendError::NotPermitted);
        }
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(SendError::Closed)
    }

    /// Queue a message, waiting up to the configured send timeout for room
    pub async fn send(&self, message: impl Into<Bytes>) -> Result<(), SendError> {
        let tx = self.sender()?;
        match tx.send_timeout(message.into(), self.send_timeout).await {
            Ok(()) => Ok(()),
            Err(mpsc::error::SendTimeoutError::Timeout(_)) => {
                self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                Err(SendError::QueueFull)
            }
            Err(mpsc::error::SendTimeoutError::Closed(_)) => Err(SendError::Closed),
        }
    }

    /// Queue a message without waiting
    pub fn try_send(&self, message: impl Into<Bytes>) -> Result<(), SendError> {
        let tx = self.sender()?;
        match tx.try_send(message.into()) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                Err(SendError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SendError::Closed),
        }
    }

    /// Close the producer side. The outbound pump drains what is queued,
    /// sends a close frame and exits.
    pub fn close_queue(&self) {
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub fn is_queue_closed(&self) -> bool {
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Fire the termination signal. Single-fire; later calls are no-ops.
    pub fn terminate(&self) {
        self.quit.cancel();
    }

    pub fn is_terminated(&self) -> bool {
        self.quit.is_cancelled()
    }

    /// Resolves once the termination signal has fired
    pub async fn terminated(&self) {
        self.quit.cancelled().await
    }

    pub fn summary(&self) -> PeerSummary {
        PeerSummary {
            name: self.name.clone(),
            role: self.role(),
            kind: self.kind,
            addr: self.meta.addr,
            user_agent: self.meta.user_agent.clone(),
            locale: self.meta.locale.clone(),
            identified: self.is_identified(),
            profile: self.profile().cloned(),
            connected_secs: self.connected_for().as_secs(),
            dropped_messages: self.dropped_messages(),
        }
    }
}

/// Read-only view of a peer for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct PeerSummary {
    pub name: String,
    pub role: Role,
    pub kind: TransportKind,
    pub addr: Option<SocketAddr>,
    pub user_agent: String,
    pub locale: String,
    pub identified: bool,
    pub profile: Option<PeerProfile>,
    pub connected_secs: u64,
    pub dropped_messages: u64,
}
