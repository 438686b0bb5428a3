//! Keepalive Pump Pair
//!
//! Every admitted peer runs exactly two loops: an inbound pump that owns the
//! read half of the transport and an outbound pump that owns the write half.
//! The inbound side enforces the liveness deadline, the outbound side sends
//! the probes that keep it from expiring.

pub mod inbound;
pub mod normalize;
pub mod outbound;

use std::time::Duration;

use crate::config::{KeepaliveConfig, TcpConfig};

pub use inbound::{InboundExit, InboundPump};
pub use normalize::normalize;
pub use outbound::{OutboundExit, OutboundPump};

/// Timing and size limits shared by both pumps of one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepaliveSettings {
    /// Deadline for a single frame write
    pub write_wait: Duration,
    /// How long the read side waits for a probe acknowledgment
    pub pong_wait: Duration,
    pub ping_period: Duration,
    pub max_message_size: usize,
}

impl KeepaliveSettings {
    pub fn from_config(keepalive: &KeepaliveConfig) -> Self {
        Self {
            write_wait: keepalive.write_wait,
            pong_wait: keepalive.pong_wait,
            ping_period: keepalive.ping_period(),
            max_message_size: keepalive.max_message_size,
        }
    }

    /// Settings for framed TCP peers, which use their own write deadline
    pub fn for_tcp(keepalive: &KeepaliveConfig, tcp: &TcpConfig) -> Self {
        Self {
            write_wait: tcp.write_timeout,
            ..Self::from_config(keepalive)
        }
    }
}

impl Default for KeepaliveSettings {
    fn default() -> Self {
        Self::from_config(&KeepaliveConfig::default())
    }
}
