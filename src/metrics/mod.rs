//! Metrics Module
//!
//! Prometheus counters and gauges for the hub.

pub mod collector;

pub use collector::{reason, HubMetrics};
