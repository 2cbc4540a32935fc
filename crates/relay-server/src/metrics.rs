//! Metrics collection and export for Relay.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use relay_core::{RelayError, RelayStats, SweepReport};
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const SESSIONS_TOTAL: &str = "relay_sessions_total";
    pub const SESSIONS_ACTIVE: &str = "relay_sessions_active";
    pub const PUSH_CHANNELS_ACTIVE: &str = "relay_push_channels_active";
    pub const MESSAGES_TOTAL: &str = "relay_messages_total";
    pub const MESSAGES_RETAINED: &str = "relay_messages_retained";
    pub const DELIVERIES_TOTAL: &str = "relay_deliveries_total";
    pub const EXPIRED_MESSAGES_TOTAL: &str = "relay_expired_messages_total";
    pub const EXPIRED_SESSIONS_TOTAL: &str = "relay_expired_sessions_total";
    pub const LATENCY_SECONDS: &str = "relay_latency_seconds";
    pub const ERRORS_TOTAL: &str = "relay_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::SESSIONS_TOTAL,
        "Total number of sessions registered since server start"
    );
    metrics::describe_gauge!(names::SESSIONS_ACTIVE, "Current number of sessions");
    metrics::describe_gauge!(
        names::PUSH_CHANNELS_ACTIVE,
        "Current number of open push channels"
    );
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of messages relayed");
    metrics::describe_gauge!(
        names::MESSAGES_RETAINED,
        "Current number of messages in the log"
    );
    metrics::describe_counter!(
        names::DELIVERIES_TOTAL,
        "Total number of message deliveries"
    );
    metrics::describe_counter!(
        names::EXPIRED_MESSAGES_TOTAL,
        "Messages evicted by the retention window"
    );
    metrics::describe_counter!(
        names::EXPIRED_SESSIONS_TOTAL,
        "Sessions removed by the idle timeout"
    );
    metrics::describe_histogram!(
        names::LATENCY_SECONDS,
        "Request processing latency in seconds"
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

/// Record a new session.
pub fn record_session() {
    counter!(names::SESSIONS_TOTAL).increment(1);
}

/// Record a relayed message.
pub fn record_message(kind: &'static str) {
    counter!(names::MESSAGES_TOTAL, "kind" => kind).increment(1);
}

/// Record deliveries over a binding (`push` or `poll`).
pub fn record_deliveries(count: usize, binding: &'static str) {
    if count > 0 {
        counter!(names::DELIVERIES_TOTAL, "binding" => binding).increment(count as u64);
    }
}

/// Record request latency.
pub fn record_latency(seconds: f64, route: &'static str) {
    histogram!(names::LATENCY_SECONDS, "route" => route).record(seconds);
}

/// Record the outcome of an expiry sweep.
pub fn record_sweep(report: &SweepReport) {
    counter!(names::EXPIRED_MESSAGES_TOTAL).increment(report.expired_messages as u64);
    counter!(names::EXPIRED_SESSIONS_TOTAL).increment(report.expired_sessions as u64);
}

/// Update gauges from relay statistics.
pub fn set_relay_stats(stats: &RelayStats) {
    gauge!(names::SESSIONS_ACTIVE).set(stats.sessions as f64);
    gauge!(names::PUSH_CHANNELS_ACTIVE).set(stats.push_sessions as f64);
    gauge!(names::MESSAGES_RETAINED).set(stats.retained_messages as f64);
}

/// Record a relay error.
pub fn record_relay_error(error: &RelayError) {
    record_error(error.kind());
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}
