//! Metrics collection and exposition.
//!
//! # Metrics
//! - `relay_requests_total` (counter): relayed responses by method, status
//! - `relay_request_duration_seconds` (histogram): time until upstream headers
//! - `relay_failures_total` (counter): failed exchanges by kind
//! - `relay_streaming_failures_total` (counter): bodies truncated after headers
//!
//! Recording is a no-op until a recorder is installed.

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::proxy::error::ErrorKind;

/// Install the Prometheus recorder and its HTTP scrape listener.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Record a relayed response.
pub fn record_request(method: &str, status: u16, started: Instant) {
    ::metrics::counter!(
        "relay_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    ::metrics::histogram!("relay_request_duration_seconds", "method" => method.to_string())
        .record(started.elapsed().as_secs_f64());
}

/// Record an exchange that ended in `Failed`.
pub fn record_failure(kind: ErrorKind, started: Instant) {
    ::metrics::counter!("relay_failures_total", "kind" => kind.as_str()).increment(1);
    ::metrics::histogram!("relay_request_duration_seconds", "method" => "failed")
        .record(started.elapsed().as_secs_f64());
}

/// Record a response body that ended early.
pub fn record_streaming_failure() {
    ::metrics::counter!("relay_streaming_failures_total").increment(1);
}
