//! Core domain types for the sumcast panel synchronization system.
//!
//! This crate provides fundamental types used throughout the pipeline:
//! - `PanelKey`, `Panel`, `PanelContent`: the dashboard panel model
//! - `SummaryEvent`, `LogEntry`: the wire protocol events
//! - `CycleInput`: per-cycle collector input handed to the publisher
//! - `MetricsSink`: backend-agnostic observation reporting

pub mod error;
pub mod event;
pub mod input;
pub mod metrics;
pub mod panel;

pub use error::{CoreError, Result};
pub use event::{now_epoch, LogEntry, SummaryEvent, SCHEMA_VERSION};
pub use input::CycleInput;
pub use metrics::{MetricsSink, NoopMetrics};
pub use panel::{Panel, PanelContent, PanelKey, PanelRef};
