//! Registration Protocol
//!
//! Turns an accepted transport into a tracked peer, runs its pump pair and
//! removes it again once both pumps are done.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::action::ActionHandler;
use crate::config::KeepaliveConfig;
use crate::directory::{AdmitError, Directory};
use crate::metrics::{reason, HubMetrics};
use crate::peer::{OutboundReceiver, Peer, PeerProfile, Role};
use crate::pump::{InboundExit, InboundPump, KeepaliveSettings, OutboundPump};
use crate::transport::{FrameSink, FrameSource, Handshake, Transport};

/// Admits new connections into a [`Directory`]
#[derive(Clone)]
pub struct Registrar {
    directory: Arc<Directory>,
    handler: Arc<dyn ActionHandler>,
    keepalive: KeepaliveConfig,
    metrics: Arc<HubMetrics>,
    next_id: Arc<AtomicU64>,
}

impl Registrar {
    pub fn new(
        directory: Arc<Directory>,
        handler: Arc<dyn ActionHandler>,
        keepalive: KeepaliveConfig,
        metrics: Arc<HubMetrics>,
    ) -> Self {
        Self {
            directory,
            handler,
            keepalive,
            metrics,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn directory(&self) -> &Arc<Directory> {
        &self.directory
    }

    /// Register a connection and serve it until it ends.
    ///
    /// Returns the refusal if the directory would not take the peer, in
    /// which case the transport has already been closed.
    pub async fn register(
        &self,
        transport: Box<dyn Transport>,
        handshake: Handshake,
        settings: KeepaliveSettings,
    ) -> Result<InboundExit, AdmitError> {
        let admitted = self.admit(transport, handshake, settings).await?;
        Ok(admitted.run().await)
    }

    /// Build a peer for the connection and admit it as `Undefined`.
    ///
    /// Identities already connected as users are refused before a peer is
    /// created. On any refusal the transport is closed.
    pub async fn admit(
        &self,
        transport: Box<dyn Transport>,
        handshake: Handshake,
        settings: KeepaliveSettings,
    ) -> Result<Admitted, AdmitError> {
        let name = handshake.identity();
        let kind = transport.kind();
        let (source, mut sink) = transport.split();

        if self.directory.exists(&name, Role::User).await {
            warn!(peer = %name, addr = ?handshake.addr, "duplicate connection refused");
            self.metrics.record_rejected(reason::DUPLICATE);
            release(sink.as_mut()).await;
            return Err(AdmitError::Duplicate {
                name,
                role: Role::User,
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (peer, queue) = Peer::new(id, name, kind, handshake.meta(), &self.keepalive);

        if let Err(e) = self.directory.admit(Arc::clone(&peer)).await {
            warn!(peer = %peer.name(), addr = ?peer.addr(), error = %e, "connection refused");
            release(sink.as_mut()).await;
            return Err(e);
        }

        info!(
            peer = %peer.name(),
            addr = ?peer.addr(),
            transport = ?kind,
            user_agent = %peer.meta().user_agent,
            "peer connected"
        );

        Ok(Admitted {
            registrar: self.clone(),
            peer,
            source,
            sink,
            queue,
            settings,
        })
    }
}

async fn release(sink: &mut dyn FrameSink) {
    if let Err(e) = sink.close().await {
        debug!(error = %e, "error while closing refused transport");
    }
}

/// A peer that is in the directory but whose pumps have not started yet
pub struct Admitted {
    registrar: Registrar,
    peer: Arc<Peer>,
    source: Box<dyn FrameSource>,
    sink: Box<dyn FrameSink>,
    queue: OutboundReceiver,
    settings: KeepaliveSettings,
}

impl std::fmt::Debug for Admitted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Admitted").field("peer", &self.peer).finish_non_exhaustive()
    }
}

impl Admitted {
    pub fn peer(&self) -> &Arc<Peer> {
        &self.peer
    }

    /// Resolve the peer's role before any frame is exchanged
    pub async fn identify(&mut self, role: Role, profile: PeerProfile) -> Result<(), AdmitError> {
        self.registrar
            .directory
            .identify(&self.peer, role, profile)
            .await
    }

    /// Back out of an admission: remove the peer and close the transport
    pub async fn reject(mut self) {
        self.registrar.directory.remove(&self.peer).await;
        release(self.sink.as_mut()).await;
    }

    /// Start the outbound pump, run the inbound pump here, and remove the
    /// peer once both have stopped.
    #[instrument(skip_all, fields(peer = %self.peer.name(), addr = ?self.peer.addr()))]
    pub async fn run(self) -> InboundExit {
        let Admitted {
            registrar,
            peer,
            source,
            sink,
            queue,
            settings,
        } = self;

        let writer = OutboundPump::new(
            Arc::clone(&peer),
            queue,
            sink,
            settings,
            Arc::clone(&registrar.metrics),
        );
        let mut writer = tokio::spawn(writer.run());

        let exit = InboundPump::new(
            Arc::clone(&peer),
            source,
            Arc::clone(&registrar.handler),
            Arc::clone(&registrar.directory),
            settings,
            Arc::clone(&registrar.metrics),
        )
        .run()
        .await;

        if exit.is_clean() {
            // let the writer flush what is queued and answer with a close frame
            peer.close_queue();
        } else {
            peer.terminate();
        }

        match timeout(settings.write_wait, &mut writer).await {
            Ok(Ok(outbound)) => debug!(?outbound, "writer finished"),
            Ok(Err(e)) => warn!(error = %e, "writer task failed"),
            Err(_) => {
                peer.terminate();
                if let Err(e) = writer.await {
                    warn!(error = %e, "writer task failed");
                }
            }
        }

        registrar.directory.remove(&peer).await;
        info!(
            role = %peer.role(),
            connected_for = ?peer.connected_for(),
            ?exit,
            "peer disconnected"
        );
        exit
    }
}
