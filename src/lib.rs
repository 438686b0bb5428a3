//! Polyhub Library
//!
//! Real-time connection hub: accepts long-lived WebSocket and framed TCP
//! connections from users, monitors and sibling servers, keeps them alive
//! with probe/acknowledge keepalive, and hands every inbound frame to a
//! pluggable action handler while queuing outbound frames per peer.

pub mod action;
pub mod config;
pub mod connection;
pub mod directory;
pub mod management;
pub mod metrics;
pub mod peer;
pub mod pump;
pub mod shutdown;
pub mod transport;

pub use action::{ActionContext, ActionHandler};
pub use config::Config;
pub use connection::ConnectionManager;
pub use directory::Directory;
pub use shutdown::ShutdownCoordinator;

/// Common error type for the hub
pub type Result<T> = anyhow::Result<T>;
