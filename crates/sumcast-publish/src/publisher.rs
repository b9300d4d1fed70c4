//! Cycle-driven diff publisher.
//!
//! Compares each cycle's panel hashes against the last published
//! baseline and appends the cheapest event that keeps subscribers
//! current: a full snapshot on the first cycle (or after an explicit
//! request), per-panel updates when something changed, a heartbeat after
//! a run of unchanged cycles, or nothing at all.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use sumcast_core::{
    CycleInput, MetricsSink, PanelContent, PanelKey, PanelRef, SummaryEvent, SCHEMA_VERSION,
};
use sumcast_panel::{PanelHasher, ERR_HASH};

use crate::event_log::EventLog;

/// Publisher tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherConfig {
    /// Consecutive unchanged cycles before a heartbeat is emitted.
    #[serde(default = "default_heartbeat_threshold")]
    pub heartbeat_threshold: u32,

    /// Emit map-form `panel_diff` events instead of list-form
    /// `panel_update`.
    #[serde(default)]
    pub structured_diffs: bool,
}

fn default_heartbeat_threshold() -> u32 {
    5
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            heartbeat_threshold: default_heartbeat_threshold(),
            structured_diffs: false,
        }
    }
}

/// What one publish cycle decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Full snapshot appended (plus `hello` on the very first cycle).
    Snapshot,
    /// Update event appended for these changed panels.
    Updated(Vec<PanelKey>),
    /// Idle threshold reached, heartbeat appended.
    Heartbeat,
    /// Nothing appended.
    Unchanged,
}

/// Hash map served by the resync endpoint, refreshed every cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResyncSnapshot {
    pub cycle: u64,
    pub generation: u64,
    pub hashes: BTreeMap<PanelKey, String>,
}

/// Point-in-time copy of the emission counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublisherStats {
    pub emitted: u64,
    pub snapshots: u64,
    pub updates: u64,
    pub heartbeats: u64,
    pub hash_errors: u64,
}

#[derive(Debug, Default)]
struct Counters {
    emitted: AtomicU64,
    snapshots: AtomicU64,
    updates: AtomicU64,
    heartbeats: AtomicU64,
    hash_errors: AtomicU64,
}

struct PublishState {
    /// Hashes of the last published content, `None` until the first
    /// snapshot (and after an explicit snapshot request).
    last_hashes: Option<BTreeMap<PanelKey, String>>,
    since_unchanged: u32,
    generation: u64,
    /// `hello` is sent once per publisher lifetime, not once per
    /// snapshot.
    hello_sent: bool,
}

/// Per-cycle decision engine appending to the shared event log.
pub struct DiffPublisher {
    config: PublisherConfig,
    hasher: PanelHasher,
    log: Arc<EventLog>,
    metrics: Arc<dyn MetricsSink>,
    state: Mutex<PublishState>,
    resync: RwLock<ResyncSnapshot>,
    counters: Counters,
}

impl DiffPublisher {
    pub fn new(
        config: PublisherConfig,
        hasher: PanelHasher,
        log: Arc<EventLog>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            config,
            hasher,
            log,
            metrics,
            state: Mutex::new(PublishState {
                last_hashes: None,
                since_unchanged: 0,
                generation: 0,
                hello_sent: false,
            }),
            resync: RwLock::new(ResyncSnapshot::default()),
            counters: Counters::default(),
        }
    }

    /// The event log this publisher appends to.
    pub fn log(&self) -> &Arc<EventLog> {
        &self.log
    }

    /// Run one publish cycle against `input`.
    pub fn publish(&self, input: &CycleInput) -> PublishOutcome {
        let hashes = self.hasher.hash(input);

        let hash_errors = hashes.values().filter(|h| h.as_str() == ERR_HASH).count() as u64;
        if hash_errors > 0 {
            self.counters.hash_errors.fetch_add(hash_errors, Ordering::Relaxed);
            for _ in 0..hash_errors {
                self.metrics.hash_failure();
            }
        }

        let mut state = self.state.lock();
        let outcome = match state.last_hashes.take() {
            None => self.publish_snapshot(&mut state, input, &hashes),
            Some(baseline) => self.publish_delta(&mut state, input, &hashes, baseline),
        };

        *self.resync.write() = ResyncSnapshot {
            cycle: input.cycle,
            generation: state.generation,
            hashes,
        };
        outcome
    }

    /// Force the next cycle to re-emit a full snapshot.
    pub fn request_snapshot(&self) {
        let mut state = self.state.lock();
        state.last_hashes = None;
        state.since_unchanged = 0;
        info!("Full snapshot requested for next cycle");
    }

    /// Latest hash map for the resync endpoint.
    pub fn resync_snapshot(&self) -> ResyncSnapshot {
        self.resync.read().clone()
    }

    /// Current generation counter.
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// Emission counters. Observability only.
    pub fn stats(&self) -> PublisherStats {
        PublisherStats {
            emitted: self.counters.emitted.load(Ordering::Relaxed),
            snapshots: self.counters.snapshots.load(Ordering::Relaxed),
            updates: self.counters.updates.load(Ordering::Relaxed),
            heartbeats: self.counters.heartbeats.load(Ordering::Relaxed),
            hash_errors: self.counters.hash_errors.load(Ordering::Relaxed),
        }
    }

    fn publish_snapshot(
        &self,
        state: &mut PublishState,
        input: &CycleInput,
        hashes: &BTreeMap<PanelKey, String>,
    ) -> PublishOutcome {
        if !state.hello_sent {
            let panels: Vec<PanelRef> = hashes
                .iter()
                .map(|(&key, hash)| PanelRef {
                    key,
                    hash: hash.clone(),
                })
                .collect();
            self.append(SummaryEvent::Hello {
                cycle: input.cycle,
                schema_version: SCHEMA_VERSION,
                panels,
            });
            state.hello_sent = true;
        }

        state.generation += 1;
        let panels: BTreeMap<PanelKey, PanelContent> = hashes
            .iter()
            .map(|(&key, hash)| {
                (key, self.hasher.builder().content(key, input, hash.clone()))
            })
            .collect();
        self.append(SummaryEvent::FullSnapshot {
            cycle: input.cycle,
            generation: state.generation,
            panels,
        });
        self.counters.snapshots.fetch_add(1, Ordering::Relaxed);

        state.last_hashes = Some(hashes.clone());
        state.since_unchanged = 0;
        info!(
            cycle = input.cycle,
            generation = state.generation,
            "Published full snapshot"
        );
        PublishOutcome::Snapshot
    }

    fn publish_delta(
        &self,
        state: &mut PublishState,
        input: &CycleInput,
        hashes: &BTreeMap<PanelKey, String>,
        mut baseline: BTreeMap<PanelKey, String>,
    ) -> PublishOutcome {
        let changed: Vec<(PanelKey, String)> = hashes
            .iter()
            .filter(|&(key, hash)| baseline.get(key) != Some(hash))
            .map(|(&key, hash)| (key, hash.clone()))
            .collect();

        if changed.is_empty() {
            state.last_hashes = Some(baseline);
            state.since_unchanged += 1;
            if state.since_unchanged >= self.config.heartbeat_threshold {
                state.since_unchanged = 0;
                self.append(SummaryEvent::Heartbeat {
                    cycle: input.cycle,
                    unchanged: true,
                });
                self.counters.heartbeats.fetch_add(1, Ordering::Relaxed);
                debug!(cycle = input.cycle, "Published heartbeat");
                return PublishOutcome::Heartbeat;
            }
            return PublishOutcome::Unchanged;
        }

        for (key, hash) in &changed {
            baseline.insert(*key, hash.clone());
        }
        state.last_hashes = Some(baseline);
        state.since_unchanged = 0;

        let changed_keys: Vec<PanelKey> = changed.iter().map(|(key, _)| *key).collect();
        let event = if self.config.structured_diffs {
            let panels: BTreeMap<PanelKey, PanelContent> = changed
                .iter()
                .map(|(key, hash)| {
                    (*key, self.hasher.builder().content(*key, input, hash.clone()))
                })
                .collect();
            SummaryEvent::PanelDiff {
                cycle: input.cycle,
                generation: state.generation,
                panels,
                structured: true,
            }
        } else {
            let updates = changed
                .iter()
                .map(|(key, hash)| self.hasher.builder().panel(*key, input, hash.clone()))
                .collect();
            SummaryEvent::PanelUpdate {
                cycle: input.cycle,
                generation: state.generation,
                updates,
            }
        };
        self.append(event);
        self.counters.updates.fetch_add(1, Ordering::Relaxed);
        debug!(
            cycle = input.cycle,
            changed = changed_keys.len(),
            "Published panel update"
        );
        PublishOutcome::Updated(changed_keys)
    }

    fn append(&self, event: SummaryEvent) {
        self.metrics.event_appended(event.kind());
        self.counters.emitted.fetch_add(1, Ordering::Relaxed);
        self.log.append(event);
    }
}

/// Drive a publisher from a channel of cycle inputs.
///
/// Ready-made producer task for collaborators that deliver inputs over
/// an mpsc channel. Stops when the channel closes or the token fires.
pub async fn run_publish_loop(
    publisher: Arc<DiffPublisher>,
    mut inputs: mpsc::Receiver<CycleInput>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("Publish loop shutting down");
                break;
            }
            maybe = inputs.recv() => {
                match maybe {
                    Some(input) => {
                        let outcome = publisher.publish(&input);
                        trace!(cycle = input.cycle, ?outcome, "Publish cycle complete");
                    }
                    None => {
                        debug!("Publish input channel closed");
                        break;
                    }
                }
            }
        }
    }
}
