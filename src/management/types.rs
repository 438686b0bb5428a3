//! Management API Types

use serde::Serialize;
use std::time::SystemTime;

use crate::directory::RoleCount;
use crate::peer::PeerSummary;

/// API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub timestamp: SystemTime,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: SystemTime::now(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: SystemTime::now(),
        }
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub server: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub accepting: bool,
}

/// Hub status: who is connected and how full each role is
#[derive(Debug, Serialize)]
pub struct HubStatus {
    pub server: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub total_peers: usize,
    pub roles: Vec<RoleCount>,
    pub peers: Vec<PeerSummary>,
    pub connections_total: u64,
    pub frames_in: u64,
    pub frames_out: u64,
    pub probes_sent: u64,
}
