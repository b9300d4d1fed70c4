//! End-to-end pipeline: publisher cycles through the shared log into a
//! subscriber-side store, including the fall-behind-and-resync path.

use std::sync::Arc;

use anyhow::Result;
use serde_json::json;

use sumcast_client::{HeartbeatHealth, SummaryStore};
use sumcast_core::{CycleInput, NoopMetrics, PanelKey};
use sumcast_panel::{PanelBuilder, PanelHasher};
use sumcast_publish::{DiffPublisher, EventLog, PublisherConfig};

fn publisher(log: Arc<EventLog>, config: PublisherConfig) -> DiffPublisher {
    DiffPublisher::new(
        config,
        PanelHasher::new(PanelBuilder::new(vec!["https://dash.local".into()])),
        log,
        Arc::new(NoopMetrics),
    )
}

fn input(cycle: u64, alerts: serde_json::Value) -> CycleInput {
    CycleInput::new(
        cycle,
        json!({
            "indices": ["SPX", "NDX"],
            "alerts": alerts,
            "analytics": {"vol": 0.21},
            "storage": {"rows": 120_000},
        }),
    )
}

/// Replay every log entry a subscriber would receive into `store`.
fn drain(log: &EventLog, cursor: u64, store: &SummaryStore) -> u64 {
    let out = log.read_from(cursor, 256);
    for entry in &out.entries {
        store.ingest(entry);
    }
    out.next_cursor
}

#[test]
fn test_subscriber_reconstructs_published_state() -> Result<()> {
    let log = Arc::new(EventLog::new(64));
    let publisher = publisher(Arc::clone(&log), PublisherConfig::default());
    let store = SummaryStore::new();

    publisher.publish(&input(1, json!([])));
    let cursor = drain(&log, 0, &store);

    assert!(!store.need_full());
    assert_eq!(store.server_generation(), 1);
    let status = store.status();
    assert_eq!(status["cycle"], json!(1));
    let panels = status["panels"].as_object().unwrap();
    assert_eq!(panels.len(), PanelKey::ALL.len());

    // An incremental change flows through as a targeted diff.
    publisher.publish(&input(2, json!([{"severity": "crit", "message": "gap down"}])));
    drain(&log, cursor, &store);

    let status = store.status();
    assert_eq!(status["cycle"], json!(2));
    let alerts_hash = status["panels"]["alerts"]["hash"].as_str().unwrap();
    let snapshot = publisher.resync_snapshot();
    assert_eq!(alerts_hash, snapshot.hashes[&PanelKey::Alerts]);
    // Unchanged panels kept their snapshot content through the merge.
    assert_eq!(
        status["panels"]["links"]["lines"],
        json!(["https://dash.local"])
    );
    assert_eq!(store.dropped_diffs(), 0);
    Ok(())
}

#[test]
fn test_heartbeats_keep_subscriber_healthy() -> Result<()> {
    let log = Arc::new(EventLog::new(64));
    let publisher = publisher(
        Arc::clone(&log),
        PublisherConfig {
            heartbeat_threshold: 2,
            structured_diffs: false,
        },
    );
    let store = SummaryStore::new();

    let mut cursor = 0;
    for _ in 0..5 {
        publisher.publish(&input(1, json!([])));
        cursor = drain(&log, cursor, &store);
    }

    // Snapshot + two heartbeats over five cycles.
    assert_eq!(publisher.stats().heartbeats, 2);
    assert_eq!(store.heartbeat(5.0, 30.0).health, HeartbeatHealth::Ok);
    // Heartbeats refresh liveness without counting as mutations.
    assert_eq!(store.ui_generation(), 1);
    Ok(())
}

#[test]
fn test_structured_diffs_reconstruct_identically() -> Result<()> {
    let log = Arc::new(EventLog::new(64));
    let publisher = publisher(
        Arc::clone(&log),
        PublisherConfig {
            heartbeat_threshold: 5,
            structured_diffs: true,
        },
    );
    let store = SummaryStore::new();

    publisher.publish(&input(1, json!([])));
    let cursor = drain(&log, 0, &store);
    publisher.publish(&input(2, json!(["halt"])));
    drain(&log, cursor, &store);

    let status = store.status();
    assert_eq!(status["cycle"], json!(2));
    assert_eq!(status["panels"]["alerts"]["lines"], json!(["halt"]));
    Ok(())
}

#[test]
fn test_fallen_behind_subscriber_recovers_via_snapshot() -> Result<()> {
    let log = Arc::new(EventLog::new(64));
    let publisher = publisher(Arc::clone(&log), PublisherConfig::default());

    // Subscriber A is current from the start.
    let current = SummaryStore::new();
    publisher.publish(&input(1, json!([])));
    let mut cursor_a = drain(&log, 0, &current);

    publisher.publish(&input(2, json!(["one"])));
    cursor_a = drain(&log, cursor_a, &current);

    // Subscriber B joins late and skips the snapshot prefix, so its
    // first observed event is a diff against a baseline it never had.
    let late = SummaryStore::new();
    publisher.publish(&input(3, json!(["one", "two"])));
    let cursor_b = drain(&log, cursor_a, &late);
    drain(&log, cursor_a, &current);

    assert!(late.need_full());
    assert_eq!(late.dropped_diffs(), 1);
    assert!(!current.need_full());

    // Recovery: the resync hash map identifies the authoritative state,
    // then a forced snapshot brings B level with A.
    let before = publisher.resync_snapshot();
    assert_eq!(before.cycle, 3);
    publisher.request_snapshot();
    publisher.publish(&input(4, json!(["one", "two"])));
    drain(&log, cursor_b, &late);

    assert!(!late.need_full());
    assert_eq!(late.server_generation(), 2);
    let status = late.status();
    assert_eq!(status["cycle"], json!(4));
    assert_eq!(status["panels"]["alerts"]["lines"], json!(["one", "two"]));
    Ok(())
}

#[test]
fn test_generation_advances_only_on_snapshots() -> Result<()> {
    let log = Arc::new(EventLog::new(64));
    let publisher = publisher(Arc::clone(&log), PublisherConfig::default());
    let store = SummaryStore::new();

    publisher.publish(&input(1, json!([])));
    publisher.publish(&input(2, json!(["a"])));
    publisher.publish(&input(3, json!(["a", "b"])));
    drain(&log, 0, &store);

    assert_eq!(publisher.generation(), 1);
    assert_eq!(store.server_generation(), 1);

    publisher.request_snapshot();
    publisher.publish(&input(4, json!(["a", "b"])));
    drain(&log, 0, &store);
    assert_eq!(store.server_generation(), 2);
    Ok(())
}
