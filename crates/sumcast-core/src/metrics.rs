//! Metrics sink abstraction, enabling testability.
//!
//! Core and transport code report observations through this trait so
//! they stay free of any metrics backend. `sumcast-telemetry` provides
//! a Prometheus implementation; collaborators that want none use
//! [`NoopMetrics`].

/// Receiver for operational observations.
///
/// All methods default to no-ops so implementations override only what
/// they record.
pub trait MetricsSink: Send + Sync {
    /// An event was appended to the log.
    fn event_appended(&self, _kind: &str) {}

    /// An event was dropped before delivery (throttle, overflow).
    fn event_dropped(&self, _reason: &str) {}

    /// Panel canonicalization failed and the sentinel hash was used.
    fn hash_failure(&self) {}

    /// A streaming connection was admitted. `active` is the count after
    /// the open.
    fn connection_opened(&self, _active: usize) {}

    /// A streaming connection ended. `active` is the count after the
    /// close.
    fn connection_closed(&self, _active: usize, _duration_secs: f64) {}

    /// A connection attempt was rejected at admission.
    fn admission_rejected(&self, _reason: &str) {}

    /// Render the full exposition text, if this sink has one.
    fn render_exposition(&self) -> Option<String> {
        None
    }
}

/// Sink that records nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {}
