//! # Prometheus Metrics
//!
//! Operational metrics for the node, scraped at `/metrics` on the dedicated
//! metrics port. All metrics live in a custom [`prometheus::Registry`] so
//! they never collide with default-registry consumers.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::Arc;

/// Holds all Prometheus metric handles for the node.
///
/// Clone-friendly (prometheus handles are internally reference-counted) so
/// it can be shared across request handlers and background tasks.
#[derive(Clone)]
pub struct NodeMetrics {
    /// Prometheus registry that owns all metrics below.
    registry: Registry,
    /// Total accepted writes.
    pub puts_total: IntCounter,
    /// Total rejected writes (invalid TTL, capacity, quorum, shutdown).
    pub put_failures_total: IntCounter,
    /// Total read requests served, hit or miss.
    pub gets_total: IntCounter,
    /// Total gossip messages received on the gossip listener.
    pub gossip_messages_received_total: IntCounter,
    /// Inbound gossip messages dropped for a bad or missing signature.
    pub gossip_auth_failures_total: IntCounter,
    /// Outbound gossip sends that failed, mirrored from the protocol's
    /// internal counter.
    pub gossip_send_failures: IntGauge,
    /// Entries currently held by the store.
    pub store_entries: IntGauge,
    /// Bytes currently held by the store.
    pub store_bytes: IntGauge,
    /// Peers currently in the gossip table.
    pub connected_peers: IntGauge,
    /// End-to-end write latency including the quorum wait, in seconds.
    pub put_duration_seconds: Histogram,
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Self {
        let registry = Registry::new_custom(Some("repram".into()), None)
            .expect("failed to create prometheus registry");

        let puts_total = IntCounter::new("puts_total", "Total accepted writes")
            .expect("metric creation");
        registry
            .register(Box::new(puts_total.clone()))
            .expect("metric registration");

        let put_failures_total =
            IntCounter::new("put_failures_total", "Total rejected writes")
                .expect("metric creation");
        registry
            .register(Box::new(put_failures_total.clone()))
            .expect("metric registration");

        let gets_total = IntCounter::new("gets_total", "Total read requests served")
            .expect("metric creation");
        registry
            .register(Box::new(gets_total.clone()))
            .expect("metric registration");

        let gossip_messages_received_total = IntCounter::new(
            "gossip_messages_received_total",
            "Total gossip messages received",
        )
        .expect("metric creation");
        registry
            .register(Box::new(gossip_messages_received_total.clone()))
            .expect("metric registration");

        let gossip_auth_failures_total = IntCounter::new(
            "gossip_auth_failures_total",
            "Inbound gossip messages dropped for signature mismatch",
        )
        .expect("metric creation");
        registry
            .register(Box::new(gossip_auth_failures_total.clone()))
            .expect("metric registration");

        let gossip_send_failures = IntGauge::new(
            "gossip_send_failures",
            "Outbound gossip sends that failed since startup",
        )
        .expect("metric creation");
        registry
            .register(Box::new(gossip_send_failures.clone()))
            .expect("metric registration");

        let store_entries = IntGauge::new("store_entries", "Entries currently held by the store")
            .expect("metric creation");
        registry
            .register(Box::new(store_entries.clone()))
            .expect("metric registration");

        let store_bytes = IntGauge::new("store_bytes", "Bytes currently held by the store")
            .expect("metric creation");
        registry
            .register(Box::new(store_bytes.clone()))
            .expect("metric registration");

        let connected_peers =
            IntGauge::new("connected_peers", "Peers currently in the gossip table")
                .expect("metric creation");
        registry
            .register(Box::new(connected_peers.clone()))
            .expect("metric registration");

        let put_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "put_duration_seconds",
                "End-to-end write latency including the quorum wait",
            )
            .buckets(vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
            ]),
        )
        .expect("metric creation");
        registry
            .register(Box::new(put_duration_seconds.clone()))
            .expect("metric registration");

        Self {
            registry,
            puts_total,
            put_failures_total,
            gets_total,
            gossip_messages_received_total,
            gossip_auth_failures_total,
            gossip_send_failures,
            store_entries,
            store_bytes,
            connected_peers,
            put_duration_seconds,
        }
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer).expect("prometheus output is valid utf-8"))
    }
}

impl Default for NodeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared metrics state passed to axum handlers.
pub type SharedMetrics = Arc<NodeMetrics>;

/// Axum handler that renders `/metrics` in Prometheus text format.
///
/// Returns HTTP 500 if encoding fails (should never happen in practice).
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_register_and_encode() {
        let metrics = NodeMetrics::new();
        metrics.puts_total.inc();
        metrics.store_bytes.set(42);

        let text = metrics.encode().unwrap();
        assert!(text.contains("repram_puts_total"));
        assert!(text.contains("repram_store_bytes 42"));
    }
}
