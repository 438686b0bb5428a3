//! Outbound pump: the only writer of a connection

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tracing::debug;

use super::KeepaliveSettings;
use crate::metrics::HubMetrics;
use crate::peer::{OutboundReceiver, Peer};
use crate::transport::{Frame, FrameSink, TransportError};

/// Close reason sent once the queue is closed and drained
pub const DISCONNECTED: &str = "Disconnected";

/// Why the outbound pump stopped writing
#[derive(Debug)]
pub enum OutboundExit {
    /// Queue closed and drained, close frame sent
    Drained,
    /// Termination signal fired
    Terminated,
    WriteFailed(TransportError),
}

pub struct OutboundPump {
    peer: Arc<Peer>,
    queue: OutboundReceiver,
    sink: Box<dyn FrameSink>,
    settings: KeepaliveSettings,
    metrics: Arc<HubMetrics>,
}

impl OutboundPump {
    pub fn new(
        peer: Arc<Peer>,
        queue: OutboundReceiver,
        sink: Box<dyn FrameSink>,
        settings: KeepaliveSettings,
        metrics: Arc<HubMetrics>,
    ) -> Self {
        Self {
            peer,
            queue,
            sink,
            settings,
            metrics,
        }
    }

    /// Write queued messages in order and probe the peer every
    /// `ping_period`. On every exit path the sink is closed and the peer's
    /// termination signal fires.
    pub async fn run(self) -> OutboundExit {
        let OutboundPump {
            peer,
            mut queue,
            mut sink,
            settings,
            metrics,
        } = self;

        let period = settings.ping_period;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let exit = loop {
            tokio::select! {
                biased;
                _ = peer.terminated() => {
                    debug!(peer = %peer.name(), "writer stopped by termination signal");
                    break OutboundExit::Terminated;
                }
                message = queue.recv() => match message {
                    Some(data) => {
                        if let Err(e) = write(sink.as_mut(), Frame::Payload(data), settings.write_wait).await {
                            debug!(peer = %peer.name(), error = %e, "write failed");
                            break OutboundExit::WriteFailed(e);
                        }
                        metrics.record_frame_out();
                    }
                    None => {
                        let close = Frame::close_normal(DISCONNECTED);
                        if let Err(e) = write(sink.as_mut(), close, settings.write_wait).await {
                            debug!(peer = %peer.name(), error = %e, "close frame not delivered");
                        }
                        break OutboundExit::Drained;
                    }
                },
                _ = ticker.tick() => {
                    if let Err(e) = write(sink.as_mut(), Frame::Ping(Bytes::new()), settings.write_wait).await {
                        debug!(peer = %peer.name(), error = %e, "ping failed");
                        break OutboundExit::WriteFailed(e);
                    }
                    metrics.record_probe();
                }
            }
        };

        if let Err(e) = sink.close().await {
            debug!(peer = %peer.name(), error = %e, "error while closing transport");
        }
        // a connection without a writer is finished; release the reader too
        peer.terminate();
        exit
    }
}

async fn write(sink: &mut dyn FrameSink, frame: Frame, wait: Duration) -> Result<(), TransportError> {
    match timeout(wait, sink.send_frame(frame)).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::WriteTimeout(wait)),
    }
}
