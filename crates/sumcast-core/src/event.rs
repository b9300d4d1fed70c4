//! Summary protocol events.
//!
//! Events are created by the publisher, appended to the shared log, and
//! never mutated afterwards. The `type` tag doubles as the SSE event name
//! on the wire.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::panel::{Panel, PanelContent, PanelKey, PanelRef};

/// Protocol schema version announced in `hello` events and by the resync
/// endpoint. Bump on any wire-incompatible change.
pub const SCHEMA_VERSION: u32 = 1;

/// One protocol event (tagged enum for type safety).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SummaryEvent {
    /// First event of a publisher's lifetime: announces the panel set.
    Hello {
        cycle: u64,
        schema_version: u32,
        panels: Vec<PanelRef>,
    },
    /// Complete content for every known panel; advances the generation.
    FullSnapshot {
        cycle: u64,
        generation: u64,
        panels: BTreeMap<PanelKey, PanelContent>,
    },
    /// Changed panels only, list form.
    PanelUpdate {
        cycle: u64,
        generation: u64,
        updates: Vec<Panel>,
    },
    /// Changed panels only, map form (structured mode).
    PanelDiff {
        cycle: u64,
        generation: u64,
        panels: BTreeMap<PanelKey, PanelContent>,
        structured: bool,
    },
    /// Liveness signal after a run of unchanged cycles.
    Heartbeat { cycle: u64, unchanged: bool },
    /// Stream-level problem a subscriber should react to (e.g. log gap).
    Error { message: String },
    /// Terminal event broadcast on graceful shutdown.
    Bye { reason: String },
}

impl SummaryEvent {
    /// Wire name of this event, used as the SSE `event:` field.
    pub fn kind(&self) -> &'static str {
        match self {
            SummaryEvent::Hello { .. } => "hello",
            SummaryEvent::FullSnapshot { .. } => "full_snapshot",
            SummaryEvent::PanelUpdate { .. } => "panel_update",
            SummaryEvent::PanelDiff { .. } => "panel_diff",
            SummaryEvent::Heartbeat { .. } => "heartbeat",
            SummaryEvent::Error { .. } => "error",
            SummaryEvent::Bye { .. } => "bye",
        }
    }
}

/// An event as stored in the log, stamped at enqueue time.
///
/// `enqueued_at` (epoch seconds) lets downstream consumers measure
/// delivery latency; it flattens into the same JSON object as the event
/// payload on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(flatten)]
    pub event: SummaryEvent,
    pub enqueued_at: f64,
}

impl LogEntry {
    /// Wrap an event and stamp it with the current time.
    pub fn new(event: SummaryEvent) -> Self {
        Self {
            event,
            enqueued_at: now_epoch(),
        }
    }
}

/// Current wall-clock time as fractional epoch seconds.
pub fn now_epoch() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1e6
}
