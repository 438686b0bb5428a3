//! Management API Module
//!
//! Read-only HTTP view of the hub: health, directory status and metrics.

pub mod api;
pub mod handlers;
pub mod types;

pub use api::ManagementApi;
pub use handlers::AppState;
pub use types::*;
