//! Metrics collection and export for Huddle.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "huddle_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "huddle_connections_active";
    pub const ADMISSIONS_REFUSED: &str = "huddle_admissions_refused_total";
    pub const SESSIONS_ACTIVE: &str = "huddle_sessions_active";
    pub const EVENTS_TOTAL: &str = "huddle_events_total";
    pub const REJECTIONS_TOTAL: &str = "huddle_rejections_total";
    pub const FRAMES_TOTAL: &str = "huddle_frames_total";
    pub const MESSAGES_BYTES: &str = "huddle_messages_bytes";
    pub const EVENT_LATENCY_SECONDS: &str = "huddle_event_latency_seconds";
    pub const ERRORS_TOTAL: &str = "huddle_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of admitted connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of open connections"
    );
    metrics::describe_counter!(
        names::ADMISSIONS_REFUSED,
        "Connections refused before the upgrade, by reason"
    );
    metrics::describe_gauge!(names::SESSIONS_ACTIVE, "Current number of live sessions");
    metrics::describe_counter!(names::EVENTS_TOTAL, "Inbound events, by name");
    metrics::describe_counter!(names::REJECTIONS_TOTAL, "Rejected events, by reason");
    metrics::describe_counter!(
        names::FRAMES_TOTAL,
        "Outbound frames, by type (timer ticks included)"
    );
    metrics::describe_counter!(names::MESSAGES_BYTES, "Message bytes, by direction");
    metrics::describe_histogram!(
        names::EVENT_LATENCY_SECONDS,
        "Event handling latency in seconds"
    );
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

fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a refused admission.
pub fn record_admission_refused(reason: &'static str) {
    counter!(names::ADMISSIONS_REFUSED, "reason" => reason).increment(1);
}

/// Update the live session count.
pub fn set_active_sessions(count: usize) {
    gauge!(names::SESSIONS_ACTIVE).set(count as f64);
}

/// Record an inbound event.
pub fn record_event(name: &'static str) {
    counter!(names::EVENTS_TOTAL, "event" => name).increment(1);
}

/// Record a rejected event.
pub fn record_rejection(reason: &'static str) {
    counter!(names::REJECTIONS_TOTAL, "reason" => reason).increment(1);
}

/// Record an outbound frame.
pub fn record_frame(kind: &'static str, bytes: usize) {
    counter!(names::FRAMES_TOTAL, "type" => kind).increment(1);
    record_bytes(bytes, "outbound");
}

/// Record message bytes.
pub fn record_bytes(bytes: usize, direction: &'static str) {
    counter!(names::MESSAGES_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Record event handling latency.
pub fn record_latency(seconds: f64) {
    histogram!(names::EVENT_LATENCY_SECONDS).record(seconds);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
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
