//! Prometheus metrics for the summary pipeline.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. If registration fails,
//! it indicates a fatal configuration error (e.g., duplicate metric names)
//! that should cause an immediate crash at startup rather than silent failure.
//! These panics only occur during static initialization, never at runtime.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram, register_int_counter, register_int_gauge,
    CounterVec, Histogram, IntCounter, IntGauge, TextEncoder,
};
use tracing::warn;

use sumcast_core::MetricsSink;

/// Total events appended to the log.
/// Labels: kind (hello/full_snapshot/panel_update/panel_diff/heartbeat/error/bye)
pub static EVENTS_APPENDED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "sumcast_events_appended_total",
        "Total summary events appended to the log",
        &["kind"]
    )
    .unwrap()
});

/// Total events dropped before delivery.
/// Labels: reason (throttle/overflow)
pub static EVENTS_DROPPED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "sumcast_events_dropped_total",
        "Total summary events dropped before delivery",
        &["reason"]
    )
    .unwrap()
});

/// Total panel hash failures resolved to the sentinel hash.
pub static HASH_FAILURES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "sumcast_hash_failures_total",
        "Total panel canonicalization failures"
    )
    .unwrap()
});

/// Currently open streaming connections.
pub static CONNECTIONS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "sumcast_connections_active",
        "Currently open streaming connections"
    )
    .unwrap()
});

/// Streaming connection lifetime in seconds, recorded at close.
pub static CONNECTION_DURATION_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "sumcast_connection_duration_seconds",
        "Streaming connection lifetime in seconds",
        vec![1.0, 5.0, 15.0, 60.0, 300.0, 900.0, 3600.0, 14400.0]
    )
    .unwrap()
});

/// Total connection attempts rejected at admission.
/// Labels: reason (token/ip/user_agent/rate/capacity)
pub static ADMISSION_REJECTED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "sumcast_admission_rejected_total",
        "Total connection attempts rejected at admission",
        &["reason"]
    )
    .unwrap()
});

/// Metrics sink backed by the process-wide Prometheus registry.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrometheusMetrics;

impl PrometheusMetrics {
    pub fn new() -> Self {
        Self
    }
}

impl MetricsSink for PrometheusMetrics {
    fn event_appended(&self, kind: &str) {
        EVENTS_APPENDED_TOTAL.with_label_values(&[kind]).inc();
    }

    fn event_dropped(&self, reason: &str) {
        EVENTS_DROPPED_TOTAL.with_label_values(&[reason]).inc();
    }

    fn hash_failure(&self) {
        HASH_FAILURES_TOTAL.inc();
    }

    fn connection_opened(&self, active: usize) {
        CONNECTIONS_ACTIVE.set(active as i64);
    }

    fn connection_closed(&self, active: usize, duration_secs: f64) {
        CONNECTIONS_ACTIVE.set(active as i64);
        CONNECTION_DURATION_SECONDS.observe(duration_secs);
    }

    fn admission_rejected(&self, reason: &str) {
        ADMISSION_REJECTED_TOTAL.with_label_values(&[reason]).inc();
    }

    fn render_exposition(&self) -> Option<String> {
        let encoder = TextEncoder::new();
        match encoder.encode_to_string(&prometheus::gather()) {
            Ok(body) => Some(body),
            Err(error) => {
                warn!(%error, "Failed to encode metrics exposition");
                None
            }
        }
    }
}
