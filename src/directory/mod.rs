//! Directory Module
//!
//! Role-scoped membership of connected peers with uniqueness and capacity
//! enforcement.

pub mod manager;
pub mod types;

pub use manager::Directory;
pub use types::*;
