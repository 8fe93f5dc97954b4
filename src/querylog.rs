//! Query history.
//!
//! Every classified query is handed to a [`QueryLog`]. The resolver treats
//! it as fire-and-forget: recording must not block and cannot fail.

use std::collections::VecDeque;
use std::net::IpAddr;
use std::time::SystemTime;

use parking_lot::Mutex;
use tracing::trace;

use crate::dns::RecordType;

/// Entries kept by [`MemoryQueryLog`] by default.
pub const DEFAULT_LOG_SIZE: usize = 100;

/// One classified query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryLogEntry {
    pub time: SystemTime,
    pub domain: String,
    pub qtype: RecordType,
    pub client: IpAddr,
    pub blocked: bool,
}

pub trait QueryLog: Send + Sync {
    fn record(&self, entry: QueryLogEntry);
}

/// Bounded in-memory history, newest entry first.
pub struct MemoryQueryLog {
    entries: Mutex<VecDeque<QueryLogEntry>>,
    capacity: usize,
}

impl MemoryQueryLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Snapshot of the history, newest first.
    pub fn entries(&self) -> Vec<QueryLogEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryQueryLog {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_SIZE)
    }
}

impl QueryLog for MemoryQueryLog {
    fn record(&self, entry: QueryLogEntry) {
        trace!(domain = %entry.domain, blocked = entry.blocked, "query logged");
        let mut entries = self.entries.lock();
        entries.push_front(entry);
        entries.truncate(self.capacity);
    }
}
