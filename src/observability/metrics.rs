//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define server metrics (requests, latency, connections, workers, cache)
//! - Install the Prometheus scrape endpoint
//! - Give every subsystem a small typed helper instead of raw macro calls
//!
//! # Metrics
//! - `tidegate_requests_total` (counter): requests by method, status
//! - `tidegate_request_duration_seconds` (histogram): latency distribution
//! - `tidegate_rate_limited_total` (counter): rejections by scope
//! - `tidegate_active_connections` (gauge): open connections
//! - `tidegate_active_workers` (gauge): connections holding a worker
//! - `tidegate_connections_closed_total` (counter): closes by reason
//! - `tidegate_worker_rejections_total` (counter): connections refused by the pool
//! - `tidegate_cache_requests_total` (counter): cache hits and misses
//! - `tidegate_upstream_errors_total` (counter): proxy failures by kind
//! - `tidegate_backend_health` (gauge): 1=healthy, 0=unhealthy
//! - `tidegate_internal_errors_total` (counter): handler errors and panics
//! - `tidegate_config_reloads_total` (counter): reloads by document
//!
//! # Design Decisions
//! - Recording without an installed recorder is a no-op, so tests need no setup
//! - Labels are low-cardinality: never paths or client addresses

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its HTTP listener.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, duration: Duration) {
    counter!(
        "tidegate_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("tidegate_request_duration_seconds").record(duration.as_secs_f64());
}

pub fn record_rate_limited(scope: &'static str) {
    counter!("tidegate_rate_limited_total", "scope" => scope).increment(1);
}

pub fn set_active_connections(count: usize) {
    gauge!("tidegate_active_connections").set(count as f64);
}

pub fn set_active_workers(count: usize) {
    gauge!("tidegate_active_workers").set(count as f64);
}

pub fn record_connection_closed(reason: &'static str) {
    counter!("tidegate_connections_closed_total", "reason" => reason).increment(1);
}

pub fn record_worker_rejection() {
    counter!("tidegate_worker_rejections_total").increment(1);
}

pub fn record_cache_lookup(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!("tidegate_cache_requests_total", "result" => result).increment(1);
}

pub fn record_upstream_error(kind: &'static str) {
    counter!("tidegate_upstream_errors_total", "kind" => kind).increment(1);
}

pub fn record_backend_health(upstream: &str, healthy: bool) {
    gauge!("tidegate_backend_health", "upstream" => upstream.to_string())
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_internal_error() {
    counter!("tidegate_internal_errors_total").increment(1);
}

pub fn record_config_reload(document: &'static str) {
    counter!("tidegate_config_reloads_total", "document" => document).increment(1);
}
