//! Subscriber-side composite state store.
//!
//! One writer (the ingest loop) and any number of readers share a store
//! through a single mutex. Read accessors return copies, never
//! references into the guarded state.

use std::collections::{BTreeMap, VecDeque};

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use sumcast_core::{now_epoch, LogEntry, PanelContent, PanelKey, SummaryEvent};

use crate::merge::merge_value_maps;

/// Newest resync reasons kept.
const MAX_NEED_FULL_REASONS: usize = 10;

/// Follow-up alerts kept, newest first.
const MAX_FOLLOWUPS: usize = 50;

/// Per-alert-type severity tracking.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SeverityEntry {
    pub active: bool,
    pub previous_active: bool,
    /// Epoch seconds of the last active flip.
    pub last_change: Option<f64>,
    /// True only on the update that deactivated the alert.
    pub resolved: bool,
    pub resolved_count: u64,
    pub reasons: Vec<String>,
    /// Raw payload of the latest update.
    pub alert: Option<Value>,
}

/// Staleness classification of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HeartbeatHealth {
    /// Nothing ever received.
    Init,
    Ok,
    Warn,
    Stale,
}

/// Derived liveness report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeartbeatReport {
    pub last_event_epoch: Option<f64>,
    pub last_full_epoch: Option<f64>,
    pub last_diff_epoch: Option<f64>,
    pub stale_seconds: Option<f64>,
    pub health: HeartbeatHealth,
}

struct StoreInner {
    status: Map<String, Value>,
    /// True once a full snapshot has been applied.
    has_baseline: bool,
    server_generation: u64,
    /// Local mutation counter, observational only.
    ui_generation: u64,
    need_full: bool,
    need_full_reasons: Vec<String>,
    severity_counts: BTreeMap<String, i64>,
    severity_state: BTreeMap<String, SeverityEntry>,
    followups: VecDeque<Value>,
    dropped_diffs: u64,
    last_event_epoch: Option<f64>,
    last_full_epoch: Option<f64>,
    last_diff_epoch: Option<f64>,
}

impl StoreInner {
    /// A successful local mutation: bump the counter and refresh the
    /// liveness timestamp.
    fn mutated(&mut self) {
        self.ui_generation += 1;
        self.last_event_epoch = Some(now_epoch());
    }

    fn note_need_full(&mut self, reason: &str) {
        self.need_full = true;
        if self.need_full_reasons.last().map(String::as_str) != Some(reason) {
            self.need_full_reasons.push(reason.to_string());
        }
        while self.need_full_reasons.len() > MAX_NEED_FULL_REASONS {
            self.need_full_reasons.remove(0);
        }
    }
}

/// Client composite state with mismatch detection.
pub struct SummaryStore {
    inner: Mutex<StoreInner>,
}

impl SummaryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                status: Map::new(),
                has_baseline: false,
                server_generation: 0,
                ui_generation: 0,
                // a fresh store needs a snapshot before diffs apply
                need_full: true,
                need_full_reasons: Vec::new(),
                severity_counts: BTreeMap::new(),
                severity_state: BTreeMap::new(),
                followups: VecDeque::new(),
                dropped_diffs: 0,
                last_event_epoch: None,
                last_full_epoch: None,
                last_diff_epoch: None,
            }),
        }
    }

    /// Replace the composite status wholesale. Returns the generation
    /// now in effect (self-incremented when the server supplied none).
    pub fn apply_full(&self, status: Map<String, Value>, server_generation: Option<u64>) -> u64 {
        let mut inner = self.inner.lock();
        inner.status = status;
        inner.server_generation = match server_generation {
            Some(generation) => generation,
            None => inner.server_generation + 1,
        };
        inner.has_baseline = true;
        inner.need_full = false;
        inner.need_full_reasons.clear();
        inner.mutated();
        inner.last_full_epoch = inner.last_event_epoch;
        debug!(generation = inner.server_generation, "Applied full snapshot");
        inner.server_generation
    }

    /// Merge a diff into the composite status. Returns false and drops
    /// the diff when no baseline exists, when the generation mismatches
    /// the stored one, or when the patch is not a map.
    pub fn apply_diff(&self, patch: &Value, server_generation: Option<u64>) -> bool {
        let mut inner = self.inner.lock();
        if !inner.has_baseline {
            inner.dropped_diffs += 1;
            debug!("Diff dropped: no baseline snapshot yet");
            return false;
        }
        if let Some(generation) = server_generation {
            if generation != inner.server_generation {
                inner.dropped_diffs += 1;
                inner.note_need_full("generation_mismatch");
                debug!(
                    received = generation,
                    stored = inner.server_generation,
                    "Diff dropped: generation mismatch"
                );
                return false;
            }
        }
        let patch_map = match patch.as_object() {
            Some(map) => map,
            None => {
                inner.dropped_diffs += 1;
                inner.note_need_full("merge_failure");
                debug!("Diff dropped: patch is not a map");
                return false;
            }
        };
        let merged = merge_value_maps(&inner.status, patch_map);
        inner.status = merged;
        inner.mutated();
        inner.last_diff_epoch = inner.last_event_epoch;
        true
    }

    /// Flag that a resync is needed, recording why. Immediately
    /// repeated reasons collapse to one entry; only the newest
    /// [`MAX_NEED_FULL_REASONS`] are kept.
    pub fn request_full(&self, reason: &str) {
        let mut inner = self.inner.lock();
        inner.note_need_full(reason);
    }

    /// Replace the severity counters.
    pub fn update_severity_counts(&self, counts: BTreeMap<String, i64>) {
        let mut inner = self.inner.lock();
        inner.severity_counts = counts;
        inner.mutated();
    }

    /// Fold one severity update into the per-type state, tracking
    /// activation flips and resolutions.
    pub fn update_severity_state(&self, alert_type: &str, payload: &Value) {
        let mut inner = self.inner.lock();
        let entry = inner
            .severity_state
            .entry(alert_type.to_string())
            .or_default();

        let was_active = entry.active;
        let now_active = payload.get("active").and_then(Value::as_bool).unwrap_or(false);
        entry.previous_active = was_active;
        entry.active = now_active;
        if was_active != now_active {
            entry.last_change = Some(now_epoch());
        }
        entry.resolved = was_active && !now_active;
        if entry.resolved {
            entry.resolved_count += 1;
        }
        entry.reasons = payload
            .get("reasons")
            .and_then(Value::as_array)
            .map(|reasons| {
                reasons
                    .iter()
                    .filter_map(|r| r.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        entry.alert = Some(payload.clone());

        inner.mutated();
    }

    /// Push a follow-up alert, newest first, keeping at most
    /// [`MAX_FOLLOWUPS`].
    pub fn add_followup(&self, entry: Value) {
        let mut inner = self.inner.lock();
        inner.followups.push_front(entry);
        inner.followups.truncate(MAX_FOLLOWUPS);
        inner.mutated();
    }

    /// Refresh the liveness timestamp from a server heartbeat without
    /// counting as a mutation.
    pub fn record_heartbeat(&self) {
        let mut inner = self.inner.lock();
        inner.last_event_epoch = Some(now_epoch());
    }

    /// Liveness report against the current wall clock.
    pub fn heartbeat(&self, warn_after: f64, stale_after: f64) -> HeartbeatReport {
        self.heartbeat_at(now_epoch(), warn_after, stale_after)
    }

    /// Liveness report against an explicit reference time.
    pub fn heartbeat_at(&self, now: f64, warn_after: f64, stale_after: f64) -> HeartbeatReport {
        let inner = self.inner.lock();
        let stale_seconds = inner.last_event_epoch.map(|t| (now - t).max(0.0));
        let health = match stale_seconds {
            None => HeartbeatHealth::Init,
            Some(age) if age >= stale_after => HeartbeatHealth::Stale,
            Some(age) if age >= warn_after => HeartbeatHealth::Warn,
            Some(_) => HeartbeatHealth::Ok,
        };
        HeartbeatReport {
            last_event_epoch: inner.last_event_epoch,
            last_full_epoch: inner.last_full_epoch,
            last_diff_epoch: inner.last_diff_epoch,
            stale_seconds,
            health,
        }
    }

    /// Route one protocol event to the matching store operation.
    pub fn ingest(&self, entry: &LogEntry) {
        match &entry.event {
            SummaryEvent::Hello { .. } => self.record_heartbeat(),
            SummaryEvent::FullSnapshot {
                cycle,
                generation,
                panels,
            } => {
                let map = composite(
                    *cycle,
                    encode_panels(panels.iter().map(|(key, content)| (*key, content.clone()))),
                );
                self.apply_full(map, Some(*generation));
            }
            SummaryEvent::PanelUpdate {
                cycle,
                generation,
                updates,
            } => {
                let map = composite(
                    *cycle,
                    encode_panels(updates.iter().map(|p| (p.key, p.clone().into_content()))),
                );
                self.apply_diff(&Value::Object(map), Some(*generation));
            }
            SummaryEvent::PanelDiff {
                cycle,
                generation,
                panels,
                ..
            } => {
                let map = composite(
                    *cycle,
                    encode_panels(panels.iter().map(|(key, content)| (*key, content.clone()))),
                );
                self.apply_diff(&Value::Object(map), Some(*generation));
            }
            SummaryEvent::Heartbeat { .. } => self.record_heartbeat(),
            SummaryEvent::Error { message } => {
                warn!(message = %message, "Stream error event received");
                self.request_full("stream_error");
            }
            SummaryEvent::Bye { reason } => {
                info!(reason = %reason, "Server said bye");
                self.request_full("server_bye");
            }
        }
    }

    /// Copy of the composite status.
    pub fn status(&self) -> Map<String, Value> {
        self.inner.lock().status.clone()
    }

    pub fn server_generation(&self) -> u64 {
        self.inner.lock().server_generation
    }

    pub fn ui_generation(&self) -> u64 {
        self.inner.lock().ui_generation
    }

    pub fn need_full(&self) -> bool {
        self.inner.lock().need_full
    }

    pub fn need_full_reasons(&self) -> Vec<String> {
        self.inner.lock().need_full_reasons.clone()
    }

    pub fn severity_counts(&self) -> BTreeMap<String, i64> {
        self.inner.lock().severity_counts.clone()
    }

    pub fn severity_state(&self) -> BTreeMap<String, SeverityEntry> {
        self.inner.lock().severity_state.clone()
    }

    /// Copy of the follow-up alerts, newest first.
    pub fn followups(&self) -> Vec<Value> {
        self.inner.lock().followups.iter().cloned().collect()
    }

    pub fn dropped_diffs(&self) -> u64 {
        self.inner.lock().dropped_diffs
    }
}

impl Default for SummaryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn composite(cycle: u64, panels: Map<String, Value>) -> Map<String, Value> {
    let mut status = Map::new();
    status.insert("cycle".to_string(), Value::from(cycle));
    status.insert("panels".to_string(), Value::Object(panels));
    status
}

fn encode_panels<I>(panels: I) -> Map<String, Value>
where
    I: IntoIterator<Item = (PanelKey, PanelContent)>,
{
    let mut map = Map::new();
    for (key, content) in panels {
        match serde_json::to_value(&content) {
            Ok(value) => {
                map.insert(key.as_str().to_string(), value);
            }
            Err(e) => warn!(panel = %key, error = %e, "Failed to encode panel content"),
        }
    }
    map
}
