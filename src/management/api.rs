//! Management API Routes

use super::handlers::*;
use axum::{routing::get, Router};
use tower_http::cors::CorsLayer;

/// Read-only status surface
pub struct ManagementApi;

impl ManagementApi {
    /// Create the management API router
    pub fn create_router(state: AppState) -> Router {
        Router::new()
            .route("/health", get(health_check))
            .route("/status", get(get_hub_status))
            .route("/status/:role", get(get_role_peers))
            .route("/metrics", get(export_metrics))
            .with_state(state)
            .layer(CorsLayer::permissive())
    }
}
