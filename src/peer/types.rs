//! Peer Types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

/// Placeholder for handshake metadata the peer did not provide
pub const NOT_AVAILABLE: &str = "n/a";

/// Category of a connected peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Role {
    Undefined = 0,
    User = 1,
    Monitor = 2,
    Server = 3,
    Incoming = 4,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::Undefined,
        Role::User,
        Role::Monitor,
        Role::Server,
        Role::Incoming,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Undefined => "undefined",
            Role::User => "user",
            Role::Monitor => "monitor",
            Role::Server => "server",
            Role::Incoming => "incoming",
        }
    }

    pub(crate) fn from_u8(value: u8) -> Role {
        match value {
            1 => Role::User,
            2 => Role::Monitor,
            3 => Role::Server,
            4 => Role::Incoming,
            _ => Role::Undefined,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownRole(s.to_string()))
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown role {0:?}")]
pub struct UnknownRole(pub String);

/// Which directions of traffic a peer is allowed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    #[default]
    ReadWrite,
    /// The peer only receives; its payloads are not dispatched
    ReadOnly,
    /// The peer only sends; nothing is queued towards it
    WriteOnly,
}

impl AccessMode {
    pub fn accepts_inbound(&self) -> bool {
        matches!(self, AccessMode::ReadWrite | AccessMode::WriteOnly)
    }

    pub fn accepts_outbound(&self) -> bool {
        matches!(self, AccessMode::ReadWrite | AccessMode::ReadOnly)
    }
}

/// Which transport variant carries the peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    WebSocket,
    WebSocketClient,
    Tcp,
    Memory,
}

/// Metadata captured from the transport handshake
#[derive(Debug, Clone, Serialize)]
pub struct PeerMeta {
    pub addr: Option<SocketAddr>,
    pub user_agent: String,
    pub locale: String,
}

impl Default for PeerMeta {
    fn default() -> Self {
        Self {
            addr: None,
            user_agent: NOT_AVAILABLE.to_string(),
            locale: NOT_AVAILABLE.to_string(),
        }
    }
}

/// Details supplied when a peer identifies itself
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerProfile {
    pub content_id: u64,
    pub front_id: String,
    pub app_id: String,
    pub country: String,
    pub mode: AccessMode,
}

/// Why an outbound message was not queued
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("outbound queue is full")]
    QueueFull,
    #[error("outbound queue is closed")]
    Closed,
    #[error("peer access mode does not allow outbound delivery")]
    NotPermitted,
}
