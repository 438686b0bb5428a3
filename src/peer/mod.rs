//! Peer Module
//!
//! Peer records, roles and access modes.

pub mod record;
pub mod types;

pub use record::{OutboundReceiver, Peer, PeerSummary};
pub use types::*;
