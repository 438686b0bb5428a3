//! Metrics Collector

use prometheus::{IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use tracing::error;

use crate::peer::Role;

/// Rejection reasons used as the `reason` label
pub mod reason {
    pub const DUPLICATE: &str = "duplicate";
    pub const CAPACITY: &str = "capacity";
    pub const SHUTDOWN: &str = "shutdown";
}

/// Hub-wide Prometheus metrics
pub struct HubMetrics {
    registry: Registry,
    connections_total: IntCounter,
    rejections_total: IntCounterVec,
    peers: IntGaugeVec,
    frames_in_total: IntCounter,
    frames_out_total: IntCounter,
    probes_sent_total: IntCounter,
    dropped_messages_total: IntCounter,
}

impl HubMetrics {
    /// Create a new metrics collector with its own registry
    pub fn new() -> Self {
        let registry = Registry::new();

        let connections_total = IntCounter::new(
            "polyhub_connections_total",
            "Total number of admitted peer connections",
        )
        .expect("Failed to create connections_total counter");

        let rejections_total = IntCounterVec::new(
            Opts::new(
                "polyhub_rejections_total",
                "Connections refused at registration or identification",
            ),
            &["reason"],
        )
        .expect("Failed to create rejections_total counter");

        let peers = IntGaugeVec::new(
            Opts::new("polyhub_peers", "Currently registered peers by role"),
            &["role"],
        )
        .expect("Failed to create peers gauge");

        let frames_in_total = IntCounter::new(
            "polyhub_frames_in_total",
            "Payload frames dispatched to the action handler",
        )
        .expect("Failed to create frames_in_total counter");

        let frames_out_total = IntCounter::new(
            "polyhub_frames_out_total",
            "Payload frames written to peers",
        )
        .expect("Failed to create frames_out_total counter");

        let probes_sent_total = IntCounter::new(
            "polyhub_probes_sent_total",
            "Liveness probes written to peers",
        )
        .expect("Failed to create probes_sent_total counter");

        let dropped_messages_total = IntCounter::new(
            "polyhub_dropped_messages_total",
            "Outbound messages refused because a queue was full",
        )
        .expect("Failed to create dropped_messages_total counter");

        registry
            .register(Box::new(connections_total.clone()))
            .expect("Failed to register connections_total");
        registry
            .register(Box::new(rejections_total.clone()))
            .expect("Failed to register rejections_total");
        registry
            .register(Box::new(peers.clone()))
            .expect("Failed to register peers");
        registry
            .register(Box::new(frames_in_total.clone()))
            .expect("Failed to register frames_in_total");
        registry
            .register(Box::new(frames_out_total.clone()))
            .expect("Failed to register frames_out_total");
        registry
            .register(Box::new(probes_sent_total.clone()))
            .expect("Failed to register probes_sent_total");
        registry
            .register(Box::new(dropped_messages_total.clone()))
            .expect("Failed to register dropped_messages_total");

        Self {
            registry,
            connections_total,
            rejections_total,
            peers,
            frames_in_total,
            frames_out_total,
            probes_sent_total,
            dropped_messages_total,
        }
    }

    pub fn record_admitted(&self, role: Role) {
        self.connections_total.inc();
        self.peers.with_label_values(&[role.as_str()]).inc();
    }

    pub fn record_rejected(&self, reason: &str) {
        self.rejections_total.with_label_values(&[reason]).inc();
    }

    pub fn record_role_change(&self, from: Role, to: Role) {
        self.peers.with_label_values(&[from.as_str()]).dec();
        self.peers.with_label_values(&[to.as_str()]).inc();
    }

    pub fn record_removed(&self, role: Role) {
        self.peers.with_label_values(&[role.as_str()]).dec();
    }

    pub fn record_frame_in(&self) {
        self.frames_in_total.inc();
    }

    pub fn record_frame_out(&self) {
        self.frames_out_total.inc();
    }

    pub fn record_probe(&self) {
        self.probes_sent_total.inc();
    }

    pub fn record_dropped(&self) {
        self.dropped_messages_total.inc();
    }

    pub fn connections_total(&self) -> u64 {
        self.connections_total.get()
    }

    pub fn rejections(&self, reason: &str) -> u64 {
        self.rejections_total.with_label_values(&[reason]).get()
    }

    pub fn frames_in(&self) -> u64 {
        self.frames_in_total.get()
    }

    pub fn frames_out(&self) -> u64 {
        self.frames_out_total.get()
    }

    pub fn probes_sent(&self) -> u64 {
        self.probes_sent_total.get()
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        match encoder.encode_to_string(&metric_families) {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to encode Prometheus metrics: {}", e);
                String::new()
            }
        }
    }
}

impl Default for HubMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_gauge_follows_lifecycle() {
        let metrics = HubMetrics::new();
        metrics.record_admitted(Role::Undefined);
        metrics.record_role_change(Role::Undefined, Role::User);

        let text = metrics.export_prometheus();
        assert!(text.contains("polyhub_peers{role=\"user\"} 1"));
        assert!(text.contains("polyhub_peers{role=\"undefined\"} 0"));

        metrics.record_removed(Role::User);
        let text = metrics.export_prometheus();
        assert!(text.contains("polyhub_peers{role=\"user\"} 0"));
        assert_eq!(metrics.connections_total(), 1);
    }

    #[test]
    fn rejections_are_labelled() {
        let metrics = HubMetrics::new();
        metrics.record_rejected(reason::DUPLICATE);
        metrics.record_rejected(reason::DUPLICATE);
        metrics.record_rejected(reason::CAPACITY);

        assert_eq!(metrics.rejections(reason::DUPLICATE), 2);
        assert_eq!(metrics.rejections(reason::CAPACITY), 1);
        assert_eq!(metrics.rejections(reason::SHUTDOWN), 0);
    }
}
