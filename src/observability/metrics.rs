//! Metrics collection and exposition.
//!
//! # Metrics
//! - `switchyard_config_reloads_total` (counter): configurations applied
//! - `switchyard_config_reload_failures_total` (counter): reloads that failed
//! - `switchyard_config_reload_duration_seconds` (histogram): compile + publish time
//! - `switchyard_config_last_reload_version` (gauge): version currently served
//! - `switchyard_rate_limited_total` (counter): requests rejected with 429
//! - `switchyard_upstream_errors_total` (counter): backend failures, by service
//!
//! # Design Decisions
//! - Recording is a no-op until an exporter is installed, so tests need no setup

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus exporter with an HTTP scrape endpoint on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_reload(version: u64, elapsed: Duration) {
    counter!("switchyard_config_reloads_total").increment(1);
    histogram!("switchyard_config_reload_duration_seconds").record(elapsed.as_secs_f64());
    gauge!("switchyard_config_last_reload_version").set(version as f64);
}

pub fn record_reload_failure() {
    counter!("switchyard_config_reload_failures_total").increment(1);
}

pub fn record_rate_limited(middleware: &str) {
    counter!("switchyard_rate_limited_total", "middleware" => middleware.to_string()).increment(1);
}

pub fn record_upstream_error(service: &str) {
    counter!("switchyard_upstream_errors_total", "service" => service.to_string()).increment(1);
}
