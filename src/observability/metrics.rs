//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by backend, outcome
//! - `proxy_request_duration_seconds` (histogram): latency distribution
//! - `proxy_bytes_total` (counter): relayed bytes by direction
//! - `proxy_no_backend_total` (counter): requests rejected with 503
//! - `proxy_backend_active_connections` (gauge): in-flight backend connections
//! - `proxy_backend_health` (gauge): 1=healthy, 0=unhealthy
//! - `proxy_health_probes_total` (counter): probes by backend, result
//!
//! Recording is a no-op until a recorder is installed with [`init_metrics`].

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

/// Record a completed request cycle.
pub fn record_request(backend: &str, outcome: &'static str, status: Option<u16>, latency: Duration) {
    let status = status.map(|s| s.to_string()).unwrap_or_else(|| "none".to_string());
    metrics::counter!(
        "proxy_requests_total",
        "backend" => backend.to_string(),
        "outcome" => outcome,
        "status" => status
    )
    .increment(1);
    metrics::histogram!("proxy_request_duration_seconds", "backend" => backend.to_string())
        .record(latency.as_secs_f64());
}

/// Record relayed byte counts for one request cycle.
pub fn record_bytes(backend: &str, request_bytes: u64, response_bytes: u64) {
    metrics::counter!("proxy_bytes_total", "backend" => backend.to_string(), "direction" => "request")
        .increment(request_bytes);
    metrics::counter!("proxy_bytes_total", "backend" => backend.to_string(), "direction" => "response")
        .increment(response_bytes);
}

/// Record a request rejected because no backend was available.
pub fn record_no_backend() {
    metrics::counter!("proxy_no_backend_total").increment(1);
}

/// Update the in-flight connection gauge for a backend.
pub fn record_active_connections(backend: &str, active: usize) {
    metrics::gauge!("proxy_backend_active_connections", "backend" => backend.to_string())
        .set(active as f64);
}

/// Update the health gauge for a backend.
pub fn record_backend_health(backend: &str, healthy: bool) {
    metrics::gauge!("proxy_backend_health", "backend" => backend.to_string())
        .set(if healthy { 1.0 } else { 0.0 });
}

/// Count one health probe.
pub fn record_probe(backend: &str, result: &'static str) {
    metrics::counter!(
        "proxy_health_probes_total",
        "backend" => backend.to_string(),
        "result" => result
    )
    .increment(1);
}
