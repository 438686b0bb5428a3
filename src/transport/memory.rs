//! In-process transport pair
//!
//! The hub side is a [`MemoryTransport`]; the far side is a [`MemoryRemote`]
//! that can push frames in, observe frames written out, and count how many
//! times the hub released the connection.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::{Frame, FrameSink, FrameSource, Transport, TransportError};
use crate::peer::TransportKind;

pub struct MemoryTransport {
    inbound: mpsc::Receiver<Frame>,
    outbound: mpsc::Sender<Frame>,
    releases: Arc<AtomicUsize>,
}

/// The far end of a [`MemoryTransport`]
pub struct MemoryRemote {
    tx: Option<mpsc::Sender<Frame>>,
    rx: mpsc::Receiver<Frame>,
    releases: Arc<AtomicUsize>,
}

/// Create a connected pair. `capacity` bounds each direction; a remote that
/// stops reading makes hub writes block once it is full.
pub fn pair(capacity: usize) -> (MemoryTransport, MemoryRemote) {
    let (to_hub, inbound) = mpsc::channel(capacity);
    let (outbound, from_hub) = mpsc::channel(capacity);
    let releases = Arc::new(AtomicUsize::new(0));
    (
        MemoryTransport {
            inbound,
            outbound,
            releases: Arc::clone(&releases),
        },
        MemoryRemote {
            tx: Some(to_hub),
            rx: from_hub,
            releases,
        },
    )
}

impl MemoryRemote {
    /// Push a frame towards the hub
    pub async fn send(&self, frame: Frame) -> Result<(), TransportError> {
        match &self.tx {
            Some(tx) => tx.send(frame).await.map_err(|_| TransportError::Closed),
            None => Err(TransportError::Closed),
        }
    }

    /// Next frame the hub wrote, `None` once the hub released the sink
    pub async fn recv(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }

    /// End the stream the hub is reading from
    pub fn hang_up(&mut self) {
        self.tx.take();
    }

    /// How many times the hub actually released its side
    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

impl Transport for MemoryTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Memory
    }

    fn split(self: Box<Self>) -> (Box<dyn FrameSource>, Box<dyn FrameSink>) {
        let MemoryTransport {
            inbound,
            outbound,
            releases,
        } = *self;
        (
            Box::new(MemorySource { inbound }),
            Box::new(MemorySink {
                outbound: Some(outbound),
                releases,
            }),
        )
    }
}

struct MemorySource {
    inbound: mpsc::Receiver<Frame>,
}

#[async_trait]
impl FrameSource for MemorySource {
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>> {
        self.inbound.recv().await.map(Ok)
    }
}

struct MemorySink {
    outbound: Option<mpsc::Sender<Frame>>,
    releases: Arc<AtomicUsize>,
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send_frame(&mut self, frame: Frame) -> Result<(), TransportError> {
        match &self.outbound {
            Some(tx) => tx.send(frame).await.map_err(|_| TransportError::Closed),
            None => Err(TransportError::Closed),
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.outbound.take().is_some() {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
