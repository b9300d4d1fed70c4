//! Per-connection SSE streaming over the shared event log.
//!
//! Each connection advances its own cursor; entries that exceed the
//! connection's token-bucket budget are dropped, never buffered, so a
//! slow client only degrades its own view.

use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use futures_util::stream;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use sumcast_core::{LogEntry, MetricsSink, SummaryEvent};
use sumcast_publish::EventLog;

use crate::admission::Admitted;
use crate::config::GatewayConfig;

/// Entries pulled from the log per poll.
const READ_BATCH: usize = 32;

/// Frame substituted for payloads that exceed the byte cap or fail to
/// serialize.
pub(crate) const TRUNCATED_FRAME: &str = "event: truncated\ndata: {}\n\n";

/// Continuous-refill token bucket. Burst capacity is twice the rate;
/// a rate of zero disables throttling.
pub(crate) struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
    rate: f64,
    burst: f64,
}

impl TokenBucket {
    pub(crate) fn new(rate: f64) -> Self {
        let burst = (rate * 2.0).max(1.0);
        Self {
            tokens: burst,
            last_refill: Instant::now(),
            rate,
            burst,
        }
    }

    fn try_take(&mut self) -> bool {
        self.try_take_at(Instant::now())
    }

    pub(crate) fn try_take_at(&mut self, now: Instant) -> bool {
        if self.rate <= 0.0 {
            return true;
        }
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.last_refill = now;
        self.tokens = (self.tokens + elapsed * self.rate).min(self.burst);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Restrict an SSE event type to `[A-Za-z0-9_-]`, at most 40 chars,
/// falling back to `message`.
pub(crate) fn sanitize_event_type(kind: &str) -> String {
    let cleaned: String = kind
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .take(40)
        .collect();
    if cleaned.is_empty() {
        "message".to_string()
    } else {
        cleaned
    }
}

/// Render one log entry as an SSE frame. Oversized or unserializable
/// payloads become a `truncated` frame with an empty object body.
pub(crate) fn frame_entry(entry: &LogEntry, max_event_bytes: usize) -> String {
    let kind = sanitize_event_type(entry.event.kind());
    match serde_json::to_string(entry) {
        Ok(payload) if max_event_bytes == 0 || payload.len() <= max_event_bytes => {
            format!("event: {kind}\ndata: {payload}\n\n")
        }
        Ok(_) => TRUNCATED_FRAME.to_string(),
        Err(error) => {
            warn!(%error, kind = %kind, "Event payload failed to serialize");
            TRUNCATED_FRAME.to_string()
        }
    }
}

/// One subscriber's view of the event log.
pub struct EventStream {
    log: Arc<EventLog>,
    cursor: u64,
    pending: VecDeque<Arc<LogEntry>>,
    bucket: TokenBucket,
    poll_interval: Duration,
    max_event_bytes: usize,
    shutdown: CancellationToken,
    metrics: Arc<dyn MetricsSink>,
    admitted: Admitted,
    opened_at: Instant,
    request_id: String,
    bye_sent: bool,
}

impl EventStream {
    /// Open a stream over `log`, starting from the oldest retained
    /// entry so a new subscriber replays the snapshot prefix.
    pub fn new(
        log: Arc<EventLog>,
        config: &GatewayConfig,
        shutdown: CancellationToken,
        metrics: Arc<dyn MetricsSink>,
        admitted: Admitted,
        request_id: String,
    ) -> Self {
        Self {
            cursor: log.oldest_index(),
            log,
            pending: VecDeque::new(),
            bucket: TokenBucket::new(config.events_per_sec),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            max_event_bytes: config.max_event_bytes,
            shutdown,
            metrics,
            admitted,
            opened_at: Instant::now(),
            request_id,
            bye_sent: false,
        }
    }

    /// Produce the next SSE frame, or None once the stream has said
    /// goodbye. Blocks on a bounded idle sleep while the log is quiet.
    pub async fn next_frame(&mut self) -> Option<String> {
        loop {
            if self.bye_sent {
                return None;
            }
            if self.shutdown.is_cancelled() {
                self.bye_sent = true;
                let bye = LogEntry::new(SummaryEvent::Bye {
                    reason: "shutdown".to_string(),
                });
                return Some(frame_entry(&bye, self.max_event_bytes));
            }
            if let Some(entry) = self.pending.pop_front() {
                if self.bucket.try_take() {
                    return Some(frame_entry(&entry, self.max_event_bytes));
                }
                self.metrics.event_dropped("throttle");
                continue;
            }
            let outcome = self.log.read_from(self.cursor, READ_BATCH);
            if outcome.gap {
                warn!(
                    request_id = %self.request_id,
                    cursor = self.cursor,
                    resumed_at = outcome.next_cursor,
                    "Cursor fell behind log rotation"
                );
                self.cursor = outcome.next_cursor;
                self.pending.extend(outcome.entries);
                let notice = LogEntry::new(SummaryEvent::Error {
                    message: "event log gap: resync recommended".to_string(),
                });
                return Some(frame_entry(&notice, self.max_event_bytes));
            }
            if !outcome.entries.is_empty() {
                self.cursor = outcome.next_cursor;
                self.pending.extend(outcome.entries);
                continue;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = self.shutdown.cancelled() => {}
            }
        }
    }

    /// Consume the stream into a chunked HTTP response body.
    pub fn into_body(self) -> Body {
        Body::from_stream(stream::unfold(self, |mut stream| async move {
            let frame = stream.next_frame().await?;
            Some((Ok::<String, Infallible>(frame), stream))
        }))
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        // The connection guard is still held here, so subtract this
        // connection from the reported count.
        let remaining = self.admitted.active_peers().saturating_sub(1);
        let duration_secs = self.opened_at.elapsed().as_secs_f64();
        self.metrics.connection_closed(remaining, duration_secs);
        info!(
            request_id = %self.request_id,
            active = remaining,
            duration_secs,
            "Stream connection closed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sumcast_core::PanelRef;

    use crate::admission::AdmissionControl;

    fn admitted() -> Admitted {
        AdmissionControl::new(&GatewayConfig::default())
            .unwrap()
            .admit("10.0.0.1".parse().unwrap(), None, None)
            .unwrap()
    }

    fn hello_entry() -> LogEntry {
        LogEntry::new(SummaryEvent::Hello {
            cycle: 1,
            schema_version: sumcast_core::SCHEMA_VERSION,
            panels: vec![PanelRef {
                key: sumcast_core::PanelKey::Header,
                hash: "abc".to_string(),
            }],
        })
    }

    #[test]
    fn test_token_bucket_enforces_rate() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(2.0);
        // Burst allows 2x the per-second rate up front.
        for _ in 0..4 {
            assert!(bucket.try_take_at(start));
        }
        assert!(!bucket.try_take_at(start));

        // Half a second refills exactly one token at 2/sec.
        let later = start + Duration::from_millis(500);
        assert!(bucket.try_take_at(later));
        assert!(!bucket.try_take_at(later));
    }

    #[test]
    fn test_token_bucket_zero_rate_is_unlimited() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(0.0);
        for _ in 0..1000 {
            assert!(bucket.try_take_at(start));
        }
    }

    #[test]
    fn test_sanitize_event_type() {
        assert_eq!(sanitize_event_type("full_snapshot"), "full_snapshot");
        assert_eq!(sanitize_event_type("weird type!\n"), "weirdtype");
        assert_eq!(sanitize_event_type(""), "message");
        let long = "x".repeat(60);
        assert_eq!(sanitize_event_type(&long).len(), 40);
    }

    #[test]
    fn test_frame_shape() {
        let frame = frame_entry(&hello_entry(), 0);
        assert!(frame.starts_with("event: hello\ndata: {"));
        assert!(frame.ends_with("\n\n"));

        let data = frame
            .lines()
            .find_map(|line| line.strip_prefix("data: "))
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(data).unwrap();
        assert_eq!(parsed["type"], json!("hello"));
        assert_eq!(parsed["cycle"], json!(1));
        assert!(parsed["enqueued_at"].as_f64().unwrap() > 0.0);
    }

    #[test]
    fn test_oversized_payload_becomes_truncated_frame() {
        let entry = hello_entry();
        let serialized = serde_json::to_string(&entry).unwrap().len();
        assert_eq!(frame_entry(&entry, serialized), format!(
            "event: hello\ndata: {}\n\n",
            serde_json::to_string(&entry).unwrap()
        ));
        assert_eq!(frame_entry(&entry, serialized - 1), TRUNCATED_FRAME);
        assert_eq!(frame_entry(&entry, 16), TRUNCATED_FRAME);
    }

    #[tokio::test]
    async fn test_stream_replays_log_then_says_bye() {
        let log = Arc::new(EventLog::new(16));
        log.append(SummaryEvent::Heartbeat {
            cycle: 1,
            unchanged: true,
        });
        log.append(SummaryEvent::Heartbeat {
            cycle: 2,
            unchanged: true,
        });

        let shutdown = CancellationToken::new();
        let mut stream = EventStream::new(
            Arc::clone(&log),
            &GatewayConfig::default(),
            shutdown.clone(),
            Arc::new(sumcast_core::NoopMetrics),
            admitted(),
            "test".to_string(),
        );

        let first = stream.next_frame().await.unwrap();
        assert!(first.starts_with("event: heartbeat\n"));
        assert!(first.contains("\"cycle\":1"));
        let second = stream.next_frame().await.unwrap();
        assert!(second.contains("\"cycle\":2"));

        shutdown.cancel();
        let bye = stream.next_frame().await.unwrap();
        assert!(bye.starts_with("event: bye\n"));
        assert!(bye.contains("\"reason\":\"shutdown\""));
        assert!(stream.next_frame().await.is_none());
    }

    #[tokio::test]
    async fn test_lagging_cursor_gets_gap_notice() {
        let log = Arc::new(EventLog::new(2));
        let shutdown = CancellationToken::new();
        let mut stream = EventStream::new(
            Arc::clone(&log),
            &GatewayConfig::default(),
            shutdown,
            Arc::new(sumcast_core::NoopMetrics),
            admitted(),
            "test".to_string(),
        );

        // Rotate the first three entries out from under the cursor.
        for cycle in 1..=5 {
            log.append(SummaryEvent::Heartbeat {
                cycle,
                unchanged: true,
            });
        }

        let notice = stream.next_frame().await.unwrap();
        assert!(notice.starts_with("event: error\n"));
        assert!(notice.contains("resync recommended"));
        // The retained tail still arrives, oldest first.
        let next = stream.next_frame().await.unwrap();
        assert!(next.contains("\"cycle\":4"));
        let next = stream.next_frame().await.unwrap();
        assert!(next.contains("\"cycle\":5"));
    }
}
