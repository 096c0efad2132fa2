//! Fire-and-forget observability sinks for finished queries.
//!
//! Reporting never blocks: when a sink's mutex is contended the record is
//! dropped and counted instead.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::query_ctx::QueryStatus;

/// Final stats of one query execution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryLogEntry {
    pub received_at_ms: u64,
    pub graph: String,
    pub query: String,
    pub status: QueryStatus,
    pub wait: Duration,
    pub execution: Duration,
    pub report: Duration,
    pub utilized_cache: bool,
    pub parameterized: bool,
    pub write: bool,
}

impl QueryLogEntry {
    pub fn total(&self) -> Duration {
        self.wait + self.execution + self.report
    }

    /// Time spent after the query left the wait queue.
    pub fn latency(&self) -> Duration {
        self.execution + self.report
    }
}

/// Keeps the slowest distinct queries.
pub struct SlowLog {
    capacity: usize,
    entries: Mutex<Vec<QueryLogEntry>>,
    dropped: AtomicU64,
}

impl SlowLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(Vec::with_capacity(capacity)),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn report(&self, entry: &QueryLogEntry) {
        if self.capacity == 0 {
            return;
        }
        let Some(mut entries) = self.entries.try_lock() else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("slow log contended, record dropped");
            return;
        };
        if let Some(existing) = entries.iter_mut().find(|e| e.query == entry.query) {
            if entry.latency() > existing.latency() {
                *existing = entry.clone();
            }
            return;
        }
        if entries.len() < self.capacity {
            entries.push(entry.clone());
            return;
        }
        let fastest = entries
            .iter()
            .enumerate()
            .min_by_key(|(_, e)| e.latency())
            .map(|(pos, e)| (pos, e.latency()));
        if let Some((pos, latency)) = fastest
            && entry.latency() > latency
        {
            entries[pos] = entry.clone();
        }
    }

    /// Entries ordered slowest first.
    pub fn entries(&self) -> Vec<QueryLogEntry> {
        let mut entries = self.entries.lock().clone();
        entries.sort_by(|a, b| b.latency().cmp(&a.latency()));
        entries
    }

    pub fn reset(&self) {
        self.entries.lock().clear();
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Ring of the most recent finished queries.
pub struct QueriesLog {
    capacity: usize,
    entries: Mutex<VecDeque<QueryLogEntry>>,
    dropped: AtomicU64,
}

impl QueriesLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn report(&self, entry: &QueryLogEntry) {
        if self.capacity == 0 {
            return;
        }
        let Some(mut entries) = self.entries.try_lock() else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("queries log contended, record dropped");
            return;
        };
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry.clone());
    }

    /// Entries oldest first.
    pub fn entries(&self) -> Vec<QueryLogEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
