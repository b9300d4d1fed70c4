//! Live-server stream test: a real subscriber over HTTP, from replayed
//! snapshot through incremental updates to the shutdown bye.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::time::timeout;

use sumcast_client::SummaryStore;
use sumcast_core::{CycleInput, LogEntry, NoopMetrics};
use sumcast_gateway::{Gateway, GatewayConfig};
use sumcast_panel::{PanelBuilder, PanelHasher};
use sumcast_publish::{DiffPublisher, EventLog, PublisherConfig};

struct Harness {
    addr: SocketAddr,
    publisher: Arc<DiffPublisher>,
    gateway: Arc<Gateway>,
}

async fn start_gateway(config: GatewayConfig) -> Result<Harness> {
    let log = Arc::new(EventLog::new(256));
    let publisher = Arc::new(DiffPublisher::new(
        PublisherConfig::default(),
        PanelHasher::new(PanelBuilder::new(vec!["https://dash.local".into()])),
        Arc::clone(&log),
        Arc::new(NoopMetrics),
    ));
    let gateway = Arc::new(Gateway::new(
        config,
        log,
        Arc::clone(&publisher),
        Arc::new(NoopMetrics),
    )?);

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let server = Arc::clone(&gateway);
    tokio::spawn(async move {
        let _ = server.serve_with_listener(listener).await;
    });

    Ok(Harness {
        addr,
        publisher,
        gateway,
    })
}

fn input(cycle: u64, alerts: serde_json::Value) -> CycleInput {
    CycleInput::new(
        cycle,
        json!({
            "indices": ["SPX"],
            "alerts": alerts,
            "analytics": {"vol": 0.2},
        }),
    )
}

/// Pulls SSE frames off a byte stream, one `event:`/`data:` pair at a
/// time.
struct FrameReader<S> {
    stream: S,
    buffer: String,
}

impl<S, B> FrameReader<S>
where
    S: futures_util::Stream<Item = reqwest::Result<B>> + Unpin,
    B: AsRef<[u8]>,
{
    fn new(stream: S) -> Self {
        Self {
            stream,
            buffer: String::new(),
        }
    }

    async fn next_frame(&mut self) -> Result<Option<(String, String)>> {
        loop {
            if let Some(end) = self.buffer.find("\n\n") {
                let frame = self.buffer[..end].to_string();
                self.buffer.drain(..end + 2);
                let mut event = String::new();
                let mut data = String::new();
                for line in frame.lines() {
                    if let Some(rest) = line.strip_prefix("event: ") {
                        event = rest.to_string();
                    } else if let Some(rest) = line.strip_prefix("data: ") {
                        data = rest.to_string();
                    }
                }
                return Ok(Some((event, data)));
            }
            match timeout(Duration::from_secs(5), self.stream.next())
                .await
                .context("timed out waiting for SSE frame")?
            {
                Some(chunk) => {
                    let bytes = chunk?;
                    self.buffer.push_str(std::str::from_utf8(bytes.as_ref())?);
                }
                None => return Ok(None),
            }
        }
    }
}

#[tokio::test]
async fn test_subscriber_follows_live_stream_to_bye() -> Result<()> {
    let harness = start_gateway(GatewayConfig {
        poll_interval_ms: 10,
        ..GatewayConfig::default()
    })
    .await?;

    // Events published before the subscriber connects replay from the
    // log prefix.
    harness.publisher.publish(&input(1, json!([])));

    let response = reqwest::Client::new()
        .get(format!("http://{}/summary/events", harness.addr))
        .header("x-request-id", "live-test-1")
        .send()
        .await?;
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok()),
        Some("text/event-stream")
    );
    assert_eq!(
        response
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok()),
        Some("live-test-1")
    );

    let mut frames = FrameReader::new(response.bytes_stream());
    let store = SummaryStore::new();

    let (event, data) = frames.next_frame().await?.context("expected hello")?;
    assert_eq!(event, "hello");
    store.ingest(&serde_json::from_str::<LogEntry>(&data)?);

    let (event, data) = frames.next_frame().await?.context("expected snapshot")?;
    assert_eq!(event, "full_snapshot");
    store.ingest(&serde_json::from_str::<LogEntry>(&data)?);
    assert!(!store.need_full());
    assert_eq!(store.status()["cycle"], json!(1));

    // A change published while connected arrives as an update.
    harness
        .publisher
        .publish(&input(2, json!([{"severity": "warn"}])));
    let (event, data) = frames.next_frame().await?.context("expected update")?;
    assert_eq!(event, "panel_update");
    store.ingest(&serde_json::from_str::<LogEntry>(&data)?);
    assert_eq!(store.status()["cycle"], json!(2));
    assert_eq!(store.dropped_diffs(), 0);

    // Graceful shutdown says bye, then the stream ends.
    harness.gateway.shutdown();
    let (event, data) = frames.next_frame().await?.context("expected bye")?;
    assert_eq!(event, "bye");
    let entry: LogEntry = serde_json::from_str(&data)?;
    store.ingest(&entry);
    assert!(store.need_full());
    assert!(frames.next_frame().await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_resync_over_http_matches_stream_hashes() -> Result<()> {
    let harness = start_gateway(GatewayConfig {
        poll_interval_ms: 10,
        ..GatewayConfig::default()
    })
    .await?;
    harness.publisher.publish(&input(5, json!(["halt"])));

    let body: serde_json::Value = reqwest::Client::new()
        .get(format!("http://{}/summary/resync", harness.addr))
        .send()
        .await?
        .json()
        .await?;

    assert_eq!(body["cycle"], json!(5));
    assert_eq!(body["schema_version"], json!(1));
    let snapshot = harness.publisher.resync_snapshot();
    for (key, hash) in &snapshot.hashes {
        assert_eq!(body["panels"][key.as_str()]["hash"], json!(hash));
    }

    harness.gateway.shutdown();
    Ok(())
}

#[tokio::test]
async fn test_oversized_events_arrive_truncated() -> Result<()> {
    let harness = start_gateway(GatewayConfig {
        poll_interval_ms: 10,
        max_event_bytes: 1024,
        ..GatewayConfig::default()
    })
    .await?;

    // The snapshot payload carries every panel and blows the small cap;
    // the hello frame fits and arrives untouched.
    harness
        .publisher
        .publish(&input(1, json!([{"filler": "x".repeat(2048)}])));

    let response = reqwest::Client::new()
        .get(format!("http://{}/summary/events", harness.addr))
        .send()
        .await?;
    let mut frames = FrameReader::new(response.bytes_stream());

    let (event, data) = frames.next_frame().await?.context("expected hello")?;
    assert_eq!(event, "hello");
    assert!(data.len() <= 1024);

    let (event, data) = frames.next_frame().await?.context("expected truncated")?;
    assert_eq!(event, "truncated");
    assert_eq!(data, "{}");

    harness.gateway.shutdown();
    Ok(())
}
