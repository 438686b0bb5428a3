//! Connection Management Module
//!
//! Listeners, the registration protocol and sibling links.

pub mod brothers;
pub mod manager;
pub mod registration;

pub use manager::ConnectionManager;
pub use registration::{Admitted, Registrar};
