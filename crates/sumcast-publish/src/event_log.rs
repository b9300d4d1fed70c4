//! Append-only in-memory event log.
//!
//! One producer appends, any number of connection tasks read through
//! their own cursors. Readers take a read-lock snapshot and never hold
//! the producer's write lock, so a slow subscriber cannot stall the
//! publish cycle.

use std::sync::Arc;

use parking_lot::RwLock;

use sumcast_core::{LogEntry, SummaryEvent};

/// Default number of retained entries before rotation.
pub const DEFAULT_MAX_ENTRIES: usize = 4096;

struct LogInner {
    /// Absolute index of `entries[0]`.
    base: u64,
    entries: Vec<Arc<LogEntry>>,
}

/// Shared append-only log of summary events.
///
/// Rotation drops the oldest entries once the cap is exceeded; a cursor
/// that has fallen behind the rotation point observes a gap and resumes
/// from the oldest retained entry.
pub struct EventLog {
    inner: RwLock<LogInner>,
    max_entries: usize,
}

/// One batch of entries handed to a cursor.
#[derive(Debug, Clone)]
pub struct ReadOutcome {
    pub entries: Vec<Arc<LogEntry>>,
    /// Cursor to pass on the next read.
    pub next_cursor: u64,
    /// True when rotation skipped entries this cursor never saw.
    pub gap: bool,
}

impl EventLog {
    /// Create a log retaining at most `max_entries` (0 = unbounded).
    pub fn new(max_entries: usize) -> Self {
        Self {
            inner: RwLock::new(LogInner {
                base: 0,
                entries: Vec::new(),
            }),
            max_entries,
        }
    }

    /// Append an event, stamping its enqueue time. Returns the absolute
    /// index assigned to it.
    pub fn append(&self, event: SummaryEvent) -> u64 {
        let entry = Arc::new(LogEntry::new(event));
        let mut inner = self.inner.write();
        inner.entries.push(entry);
        if self.max_entries > 0 && inner.entries.len() > self.max_entries {
            let excess = inner.entries.len() - self.max_entries;
            inner.entries.drain(0..excess);
            inner.base += excess as u64;
        }
        inner.base + inner.entries.len() as u64 - 1
    }

    /// Read up to `max` entries starting at `cursor`.
    pub fn read_from(&self, cursor: u64, max: usize) -> ReadOutcome {
        let inner = self.inner.read();
        let end = inner.base + inner.entries.len() as u64;
        if cursor >= end {
            return ReadOutcome {
                entries: Vec::new(),
                next_cursor: cursor,
                gap: false,
            };
        }
        let gap = cursor < inner.base;
        let start = cursor.max(inner.base);
        let offset = (start - inner.base) as usize;
        let take = inner.entries.len().saturating_sub(offset).min(max);
        let entries: Vec<Arc<LogEntry>> =
            inner.entries[offset..offset + take].iter().cloned().collect();
        ReadOutcome {
            next_cursor: start + take as u64,
            entries,
            gap,
        }
    }

    /// Absolute index the next append will receive.
    pub fn next_index(&self) -> u64 {
        let inner = self.inner.read();
        inner.base + inner.entries.len() as u64
    }

    /// Absolute index of the oldest retained entry.
    pub fn oldest_index(&self) -> u64 {
        self.inner.read().base
    }

    /// Number of currently retained entries.
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}
