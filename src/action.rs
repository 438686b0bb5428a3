//! Action Handlers
//!
//! The hub does not interpret payloads. Each inbound frame is handed to an
//! [`ActionHandler`] on its own task together with an [`ActionContext`];
//! anything the handler wants to say back goes through the peer's outbound
//! queue, and resolving who the peer is goes through the context.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::directory::{AdmitError, Directory};
use crate::peer::{Peer, PeerProfile, Role, SendError};

/// The peer a payload came from and the directory it is registered in
#[derive(Clone)]
pub struct ActionContext {
    peer: Arc<Peer>,
    directory: Arc<Directory>,
}

impl ActionContext {
    pub fn new(peer: Arc<Peer>, directory: Arc<Directory>) -> Self {
        Self { peer, directory }
    }

    pub fn peer(&self) -> &Arc<Peer> {
        &self.peer
    }

    pub fn directory(&self) -> &Arc<Directory> {
        &self.directory
    }

    /// Move the peer out of `Undefined` into `role`.
    ///
    /// Subject to the role's ceiling and name uniqueness, like any other
    /// identification.
    pub async fn identify(&self, role: Role, profile: PeerProfile) -> Result<(), AdmitError> {
        self.directory.identify(&self.peer, role, profile).await
    }

    /// Queue a message back to the sender
    pub async fn reply(&self, message: impl Into<Bytes>) -> Result<(), SendError> {
        self.peer.send(message).await
    }
}

#[async_trait]
pub trait ActionHandler: Send + Sync + 'static {
    /// Called once per inbound frame. Nothing is returned to the caller.
    async fn handle(&self, ctx: ActionContext, payload: Bytes);
}

/// Sends every payload straight back to its sender
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoHandler;

#[async_trait]
impl ActionHandler for EchoHandler {
    async fn handle(&self, ctx: ActionContext, payload: Bytes) {
        if let Err(e) = ctx.reply(payload).await {
            warn!(peer = %ctx.peer().name(), error = %e, "echo not delivered");
        }
    }
}

/// Logs payloads and otherwise discards them
#[derive(Debug, Default, Clone, Copy)]
pub struct LogHandler;

#[async_trait]
impl ActionHandler for LogHandler {
    async fn handle(&self, ctx: ActionContext, payload: Bytes) {
        let peer = ctx.peer();
        debug!(
            peer = %peer.name(),
            role = %peer.role(),
            size = payload.len(),
            "payload: {}",
            String::from_utf8_lossy(&payload)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConnectionLimits, KeepaliveConfig};
    use crate::metrics::HubMetrics;
    use crate::peer::{OutboundReceiver, PeerMeta, TransportKind};

    async fn context(name: &str, limits: ConnectionLimits) -> (ActionContext, OutboundReceiver) {
        let (peer, rx) = Peer::new(
            7,
            name,
            TransportKind::Memory,
            PeerMeta::default(),
            &KeepaliveConfig::default(),
        );
        let directory = Arc::new(Directory::new(limits, Arc::new(HubMetrics::new())));
        directory.admit(Arc::clone(&peer)).await.unwrap();
        (ActionContext::new(peer, directory), rx)
    }

    #[tokio::test]
    async fn echo_replies_through_the_queue() {
        let (ctx, mut rx) = context("echo", ConnectionLimits::default()).await;

        EchoHandler.handle(ctx, Bytes::from("hi")).await;
        assert_eq!(rx.recv().await.unwrap(), Bytes::from("hi"));
    }

    #[tokio::test]
    async fn log_handler_sends_nothing() {
        let (ctx, mut rx) = context("quiet", ConnectionLimits::default()).await;

        LogHandler.handle(ctx, Bytes::from("hi")).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn context_identifies_within_the_role_ceiling() {
        let limits = ConnectionLimits {
            max_users: 0,
            ..ConnectionLimits::default()
        };
        let (ctx, _rx) = context("alice", limits).await;

        let err = ctx.identify(Role::User, PeerProfile::default()).await.unwrap_err();
        assert_eq!(
            err,
            AdmitError::CapacityExceeded {
                role: Role::User,
                limit: 0
            }
        );

        ctx.identify(Role::Monitor, PeerProfile::default()).await.unwrap();
        assert_eq!(ctx.peer().role(), Role::Monitor);
        assert!(ctx.directory().exists("alice", Role::Monitor).await);
    }
}
