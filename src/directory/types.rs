//! Directory Types

use serde::Serialize;

use crate::peer::{PeerSummary, Role};

/// Why the directory refused a peer
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdmitError {
    #[error("peer {name} is already registered as {role}")]
    Duplicate { name: String, role: Role },
    #[error("{role} capacity of {limit} reached")]
    CapacityExceeded { role: Role, limit: usize },
    #[error("peer {name} is not registered")]
    NotRegistered { name: String },
    #[error("peer {name} is already identified")]
    AlreadyIdentified { name: String },
    #[error("directory is closed")]
    Closed,
}

/// Occupancy of one role bucket
#[derive(Debug, Clone, Serialize)]
pub struct RoleCount {
    pub role: Role,
    pub count: usize,
    pub limit: usize,
}

/// Point-in-time copy of the directory for reporting
#[derive(Debug, Clone, Serialize)]
pub struct DirectorySnapshot {
    pub total: usize,
    pub roles: Vec<RoleCount>,
    pub peers: Vec<PeerSummary>,
}

impl DirectorySnapshot {
    pub fn count(&self, role: Role) -> usize {
        self.roles
            .iter()
            .find(|rc| rc.role == role)
            .map(|rc| rc.count)
            .unwrap_or(0)
    }
}
