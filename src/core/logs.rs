//! Bounded, deduplicating in-memory log of protocol traffic.
//!
//! The store keeps at most `max_logs` entries and evicts the oldest first.
//! A push whose `(kind, payload)` equals the most recent entry bumps that
//! entry's `repeat_count` instead of appending.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use time::OffsetDateTime;
use tokio::sync::broadcast;

/// Default number of retained entries.
pub const DEFAULT_MAX_LOGS: usize = 100;

const LOG_BROADCAST_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub seq: u64,
    pub timestamp: OffsetDateTime,
    /// Direction and message tag, e.g. `client.toolResponse`.
    pub kind: String,
    pub payload: String,
    pub repeat_count: u32,
}

struct Inner {
    entries: VecDeque<LogEntry>,
    max_logs: usize,
    next_seq: u64,
}

/// Cloneable handle; all clones share the same entries.
#[derive(Clone)]
pub struct LogStore {
    inner: Arc<Mutex<Inner>>,
    tx: broadcast::Sender<LogEntry>,
}

impl Default for LogStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LOGS)
    }
}

impl std::fmt::Debug for LogStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("LogStore")
            .field("len", &inner.entries.len())
            .field("max_logs", &inner.max_logs)
            .finish()
    }
}

impl LogStore {
    pub fn new(max_logs: usize) -> Self {
        let (tx, _) = broadcast::channel(LOG_BROADCAST_CAPACITY);
        Self {
            inner: Arc::new(Mutex::new(Inner {
                entries: VecDeque::with_capacity(max_logs.max(1)),
                max_logs: max_logs.max(1),
                next_seq: 0,
            })),
            tx,
        }
    }

    /// Record an entry, collapsing it into the previous one when identical.
    pub fn push(&self, kind: impl Into<String>, payload: impl Into<String>) {
        let kind = kind.into();
        let payload = payload.into();
        let now = OffsetDateTime::now_utc();

        let entry = {
            let mut inner = self.inner.lock();
            match inner.entries.back_mut() {
                Some(last) if last.kind == kind && last.payload == payload => {
                    last.repeat_count += 1;
                    last.timestamp = now;
                    last.clone()
                }
                _ => {
                    let seq = inner.next_seq;
                    inner.next_seq += 1;
                    let entry = LogEntry {
                        seq,
                        timestamp: now,
                        kind,
                        payload,
                        repeat_count: 1,
                    };
                    inner.entries.push_back(entry.clone());
                    while inner.entries.len() > inner.max_logs {
                        inner.entries.pop_front();
                    }
                    entry
                }
            }
        };

        let _ = self.tx.send(entry);
    }

    /// Snapshot of retained entries, oldest first.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.inner.lock().entries.iter().cloned().collect()
    }

    pub fn last(&self) -> Option<LogEntry> {
        self.inner.lock().entries.back().cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    pub fn max_logs(&self) -> usize {
        self.inner.lock().max_logs
    }

    /// Change the capacity, evicting oldest entries if it shrinks.
    pub fn set_max_logs(&self, max_logs: usize) {
        let mut inner = self.inner.lock();
        inner.max_logs = max_logs.max(1);
        while inner.entries.len() > inner.max_logs {
            inner.entries.pop_front();
        }
    }

    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }

    /// Live feed of pushed (or re-counted) entries.
    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.tx.subscribe()
    }
}
