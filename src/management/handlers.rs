//! Management API Handlers

use super::types::*;
use crate::config::Config;
use crate::directory::Directory;
use crate::metrics::HubMetrics;
use crate::peer::{PeerSummary, Role, UnknownRole};
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::debug;

/// Shared application state for handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub directory: Arc<Directory>,
    pub metrics: Arc<HubMetrics>,
    pub start_time: SystemTime,
}

impl AppState {
    fn uptime_seconds(&self) -> u64 {
        SystemTime::now()
            .duration_since(self.start_time)
            .unwrap_or_default()
            .as_secs()
    }
}

/// Health check handler
pub async fn health_check(State(state): State<AppState>) -> Json<ApiResponse<HealthStatus>> {
    let accepting = !state.directory.is_closed().await;
    let health = HealthStatus {
        status: if accepting { "ok" } else { "draining" }.to_string(),
        server: state.config.server.name.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime_seconds(),
        accepting,
    };

    Json(ApiResponse::success(health))
}

/// Per-role occupancy and every connected peer
pub async fn get_hub_status(State(state): State<AppState>) -> Json<ApiResponse<HubStatus>> {
    let snapshot = state.directory.snapshot().await;

    let status = HubStatus {
        server: state.config.server.name.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime_seconds(),
        total_peers: snapshot.total,
        roles: snapshot.roles,
        peers: snapshot.peers,
        connections_total: state.metrics.connections_total(),
        frames_in: state.metrics.frames_in(),
        frames_out: state.metrics.frames_out(),
        probes_sent: state.metrics.probes_sent(),
    };

    Json(ApiResponse::success(status))
}

/// Peers registered under one role
pub async fn get_role_peers(
    State(state): State<AppState>,
    Path(role): Path<String>,
) -> Result<Json<ApiResponse<Vec<PeerSummary>>>, (StatusCode, Json<ApiResponse<()>>)> {
    let role: Role = role.parse().map_err(|e: UnknownRole| {
        debug!("Status requested for unknown role: {}", e);
        (StatusCode::BAD_REQUEST, Json(ApiResponse::error(e.to_string())))
    })?;

    let peers = state
        .directory
        .enumerate(role)
        .await
        .iter()
        .map(|peer| peer.summary())
        .collect();

    Ok(Json(ApiResponse::success(peers)))
}

/// Prometheus text exposition
pub async fn export_metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.export_prometheus(),
    )
}
