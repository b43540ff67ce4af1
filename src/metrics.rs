//! Prometheus metrics for the gateway.
//!
//! Exposed on a dedicated listener when `METRICS_PORT > 0`. Every recording
//! function is a no-op until [`init_metrics`] installs the exporter, so the
//! middleware can record unconditionally.
//!
//! # Available Metrics
//!
//! ## Counters
//! - `gateway_rate_limited_total` - Requests refused with 429
//! - `gateway_auth_failures_total` - Rejected credentials (label: reason)
//!
//! ## Histograms
//! - `gateway_request_duration_seconds` - Request duration (labels: route, method, status)
//!
//! ## Gauges
//! - `gateway_tracked_clients` - Client keys held per store (label: store)

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{error, info};

/// Metric names as constants for consistency.
pub mod names {
    pub const REQUEST_DURATION_SECONDS: &str = "gateway_request_duration_seconds";
    pub const RATE_LIMITED_TOTAL: &str = "gateway_rate_limited_total";
    pub const AUTH_FAILURES_TOTAL: &str = "gateway_auth_failures_total";
    pub const TRACKED_CLIENTS: &str = "gateway_tracked_clients";
}

/// Initialize the Prometheus metrics exporter on `metrics_addr`.
pub fn init_metrics(metrics_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_histogram!(
        names::REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );
    describe_counter!(
        names::RATE_LIMITED_TOTAL,
        "Total number of requests rejected with 429"
    );
    describe_counter!(
        names::AUTH_FAILURES_TOTAL,
        "Total number of requests rejected as unauthenticated"
    );
    describe_gauge!(
        names::TRACKED_CLIENTS,
        "Number of client keys tracked per store (label: store)"
    );

    info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Try to initialize metrics, logging any errors but not failing.
pub fn try_init_metrics(metrics_addr: SocketAddr) {
    if let Err(e) = init_metrics(metrics_addr) {
        error!(error = %e, "Failed to initialize metrics, continuing without metrics");
    }
}

pub fn record_request_duration(route: &str, method: &str, status: &str, duration_secs: f64) {
    histogram!(names::REQUEST_DURATION_SECONDS, "route" => route.to_string(), "method" => method.to_string(), "status" => status.to_string())
        .record(duration_secs);
}

pub fn record_rate_limited() {
    counter!(names::RATE_LIMITED_TOTAL).increment(1);
}

/// `reason` is a short stable label such as `missing` or `expired`.
pub fn record_auth_failure(reason: &'static str) {
    counter!(names::AUTH_FAILURES_TOTAL, "reason" => reason).increment(1);
}

/// `store` is `rate_limit` or `auth_failures`.
pub fn set_tracked_clients(store: &'static str, count: usize) {
    gauge!(names::TRACKED_CLIENTS, "store" => store).set(count as f64);
}
