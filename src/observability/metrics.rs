//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define edge router metrics (requests, latency, reloads, TLS failures)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `edge_requests_total` (counter): requests by host, action, status
//! - `edge_request_duration_seconds` (histogram): latency distribution by host, action
//! - `edge_config_reloads_total` (counter): reload attempts by result
//! - `edge_tls_handshake_failures_total` (counter): handshakes with no certificate
//!
//! # Design Decisions
//! - Recording is a no-op until an exporter is installed
//! - Labels stay low-cardinality: configured host labels, never raw Host headers
//! - Histogram buckets tuned for typical web latencies

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder};

const REQUESTS_TOTAL: &str = "edge_requests_total";
const REQUEST_DURATION: &str = "edge_request_duration_seconds";
const RELOADS_TOTAL: &str = "edge_config_reloads_total";
const TLS_FAILURES_TOTAL: &str = "edge_tls_handshake_failures_total";

const LATENCY_BUCKETS: [f64; 12] = [
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Install the Prometheus recorder and its scrape endpoint on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(Matcher::Full(REQUEST_DURATION.to_string()), &LATENCY_BUCKETS)?
        .install()?;

    metrics::describe_counter!(REQUESTS_TOTAL, "Requests handled, by host, action and status");
    metrics::describe_histogram!(REQUEST_DURATION, "Request latency in seconds");
    metrics::describe_counter!(RELOADS_TOTAL, "Configuration reload attempts, by result");
    metrics::describe_counter!(TLS_FAILURES_TOTAL, "TLS handshakes refused for lack of a certificate");

    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

/// Record one finished request.
pub fn record_request(host: &str, action: &'static str, status: u16, start: Instant) {
    let labels = [
        ("host", host.to_string()),
        ("action", action.to_string()),
        ("status", status.to_string()),
    ];
    metrics::counter!(REQUESTS_TOTAL, &labels).increment(1);
    metrics::histogram!(REQUEST_DURATION, &labels[..2]).record(start.elapsed().as_secs_f64());
}

/// Record a configuration reload attempt.
pub fn record_reload(success: bool) {
    let result = if success { "success" } else { "failure" };
    metrics::counter!(RELOADS_TOTAL, "result" => result).increment(1);
}

pub fn record_tls_handshake_failure() {
    metrics::counter!(TLS_FAILURES_TOTAL).increment(1);
}
