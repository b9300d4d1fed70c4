//! Prometheus metrics and structured logging for sumcast.
//!
//! [`PrometheusMetrics`] is the production [`MetricsSink`] implementation
//! wired into the publisher and gateway; [`init_logging`] sets up
//! tracing the same way for every sumcast process.
//!
//! [`MetricsSink`]: sumcast_core::MetricsSink

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::PrometheusMetrics;
