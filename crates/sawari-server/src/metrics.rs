//! Metrics collection and export for the Sawari hub.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use sawari_core::EngineStats;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "sawari_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "sawari_connections_active";
    pub const MESSAGES_TOTAL: &str = "sawari_messages_total";
    pub const MESSAGES_BYTES: &str = "sawari_messages_bytes";
    pub const DRIVERS_ACTIVE: &str = "sawari_drivers_active";
    pub const STUDENTS_ACTIVE: &str = "sawari_students_active";
    pub const REQUESTS_ACTIVE: &str = "sawari_requests_active";
    pub const ERRORS_TOTAL: &str = "sawari_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of frames processed");
    metrics::describe_counter!(names::MESSAGES_BYTES, "Total bytes of frames processed");
    metrics::describe_gauge!(names::DRIVERS_ACTIVE, "Currently connected drivers");
    metrics::describe_gauge!(names::STUDENTS_ACTIVE, "Currently connected students");
    metrics::describe_gauge!(names::REQUESTS_ACTIVE, "Ride requests currently in flight");
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a frame.
pub fn record_message(bytes: usize, direction: &str) {
    counter!(names::MESSAGES_TOTAL, "direction" => direction.to_string()).increment(1);
    counter!(names::MESSAGES_BYTES, "direction" => direction.to_string()).increment(bytes as u64);
}

/// Update the presence gauges from engine counters.
pub fn set_presence(stats: EngineStats) {
    gauge!(names::DRIVERS_ACTIVE).set(stats.drivers as f64);
    gauge!(names::STUDENTS_ACTIVE).set(stats.students as f64);
    gauge!(names::REQUESTS_ACTIVE).set(stats.requesting as f64);
}

/// Record an error.
pub fn record_error(error_type: &str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type.to_string()).increment(1);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}
