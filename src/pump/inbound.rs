//! Inbound pump: the only reader of a connection

use std::sync::Arc;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

use super::{normalize, KeepaliveSettings};
use crate::action::{ActionContext, ActionHandler};
use crate::directory::Directory;
use crate::metrics::HubMetrics;
use crate::peer::Peer;
use crate::transport::{Frame, FrameSource, TransportError};

/// Why the inbound pump stopped reading
#[derive(Debug)]
pub enum InboundExit {
    /// The peer sent a close frame
    PeerClosed,
    /// The stream ended without a close frame
    Ended,
    /// No probe acknowledgment arrived before the deadline
    TimedOut,
    /// The peer's termination signal fired
    Terminated,
    Failed(TransportError),
}

impl InboundExit {
    /// Clean, peer-initiated close
    pub fn is_clean(&self) -> bool {
        matches!(self, InboundExit::PeerClosed)
    }
}

pub struct InboundPump {
    peer: Arc<Peer>,
    source: Box<dyn FrameSource>,
    handler: Arc<dyn ActionHandler>,
    directory: Arc<Directory>,
    settings: KeepaliveSettings,
    metrics: Arc<HubMetrics>,
}

impl InboundPump {
    pub fn new(
        peer: Arc<Peer>,
        source: Box<dyn FrameSource>,
        handler: Arc<dyn ActionHandler>,
        directory: Arc<Directory>,
        settings: KeepaliveSettings,
        metrics: Arc<HubMetrics>,
    ) -> Self {
        Self {
            peer,
            source,
            handler,
            directory,
            settings,
            metrics,
        }
    }

    /// Read frames until the connection fails, closes or goes silent.
    ///
    /// The read deadline starts at `pong_wait` and only a probe
    /// acknowledgment pushes it forward. Payloads are normalized and handed
    /// to the action handler on their own task, in arrival order.
    pub async fn run(mut self) -> InboundExit {
        let mut deadline = Instant::now() + self.settings.pong_wait;

        loop {
            let next = tokio::select! {
                biased;
                _ = self.peer.terminated() => {
                    debug!(peer = %self.peer.name(), "reader stopped by termination signal");
                    return InboundExit::Terminated;
                }
                next = timeout_at(deadline, self.source.next_frame()) => next,
            };

            let frame = match next {
                Err(_) => {
                    warn!(
                        peer = %self.peer.name(),
                        "no pong within {:?}, dropping connection",
                        self.settings.pong_wait
                    );
                    return InboundExit::TimedOut;
                }
                Ok(None) => {
                    warn!(peer = %self.peer.name(), "connection closed unexpectedly");
                    return InboundExit::Ended;
                }
                Ok(Some(Err(e))) => {
                    warn!(peer = %self.peer.name(), error = %e, "read failed");
                    return InboundExit::Failed(e);
                }
                Ok(Some(Ok(frame))) => frame,
            };

            match frame {
                Frame::Pong(_) => {
                    deadline = Instant::now() + self.settings.pong_wait;
                }
                // the transport layer answers pings on its own
                Frame::Ping(_) => {}
                Frame::Close(reason) => {
                    debug!(peer = %self.peer.name(), ?reason, "peer closed the connection");
                    return InboundExit::PeerClosed;
                }
                Frame::Payload(data) => {
                    if data.len() > self.settings.max_message_size {
                        let err = TransportError::FrameTooLarge {
                            size: data.len(),
                            limit: self.settings.max_message_size,
                        };
                        warn!(peer = %self.peer.name(), error = %err, "oversized frame");
                        return InboundExit::Failed(err);
                    }

                    self.metrics.record_frame_in();
                    if !self.peer.mode().accepts_inbound() {
                        debug!(peer = %self.peer.name(), "read-only peer, payload ignored");
                        continue;
                    }

                    let payload = normalize(data);
                    let handler = Arc::clone(&self.handler);
                    let ctx = ActionContext::new(Arc::clone(&self.peer), Arc::clone(&self.directory));
                    tokio::spawn(async move {
                        handler.handle(ctx, payload).await;
                    });
                }
            }
        }
    }
}
