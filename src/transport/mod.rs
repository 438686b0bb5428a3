//! Transport Module
//!
//! A transport is split once, at registration, into a frame source owned by
//! the inbound pump and a frame sink owned by the outbound pump. Nothing else
//! reads or writes the connection.

pub mod client;
pub mod memory;
pub mod tcp;
pub mod websocket;

use async_trait::async_trait;
use bytes::Bytes;
use std::net::SocketAddr;

use crate::peer::{PeerMeta, TransportKind, NOT_AVAILABLE};

pub use client::WsClientTransport;
pub use memory::{MemoryRemote, MemoryTransport};
pub use tcp::TcpTransport;
pub use websocket::WebSocketTransport;

/// WebSocket close code for a normal closure
pub const CLOSE_NORMAL: u16 = 1000;

/// One unit on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Payload(Bytes),
    /// Liveness probe
    Ping(Bytes),
    /// Liveness acknowledgment
    Pong(Bytes),
    Close(Option<CloseReason>),
}

impl Frame {
    pub fn close_normal(reason: impl Into<String>) -> Self {
        Frame::Close(Some(CloseReason {
            code: CLOSE_NORMAL,
            reason: reason.into(),
        }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: u16,
    pub reason: String,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("frame of {size} bytes exceeds the {limit} byte limit")]
    FrameTooLarge { size: usize, limit: usize },
    #[error("transport i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("write deadline of {0:?} exceeded")]
    WriteTimeout(std::time::Duration),
    #[error("connection closed")]
    Closed,
    #[error("handshake timed out")]
    HandshakeTimeout,
}

/// Read half of a transport
#[async_trait]
pub trait FrameSource: Send {
    /// Next frame, or `None` once the stream has ended
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>>;
}

/// Write half of a transport
#[async_trait]
pub trait FrameSink: Send {
    async fn send_frame(&mut self, frame: Frame) -> Result<(), TransportError>;

    /// Release the connection. Must tolerate repeated calls.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// A connected, message-framed, bidirectional endpoint
pub trait Transport: Send + 'static {
    fn kind(&self) -> TransportKind;

    fn split(self: Box<Self>) -> (Box<dyn FrameSource>, Box<dyn FrameSink>);
}

/// What the transport handshake told us about the peer
#[derive(Debug, Clone, Default)]
pub struct Handshake {
    /// Per-session key, e.g. `Sec-WebSocket-Key`
    pub key: Option<String>,
    pub addr: Option<SocketAddr>,
    pub user_agent: Option<String>,
    pub locale: Option<String>,
}

impl Handshake {
    /// Candidate identity: the session key, or a fresh uuid when there is none
    pub fn identity(&self) -> String {
        match &self.key {
            Some(key) if !key.trim().is_empty() => key.trim().to_string(),
            _ => uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn meta(&self) -> PeerMeta {
        let or_na = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .unwrap_or(NOT_AVAILABLE)
                .to_string()
        };

        PeerMeta {
            addr: self.addr,
            user_agent: or_na(&self.user_agent),
            locale: or_na(&self.locale),
        }
    }
}
