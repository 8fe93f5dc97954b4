//! Pending forwarded queries, keyed by transaction ID.
//!
//! UDP is stateless, so every query sent upstream is remembered here along
//! with the client that asked. When an answer with the same ID comes back,
//! the entry is consumed and the answer relayed to that client. The table is
//! a bounded FIFO: once full, the oldest in-flight query is forgotten and its
//! answer will be dropped.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::warn;

use crate::error::LockTimeout;

/// Default number of in-flight queries remembered.
pub const DEFAULT_CAPACITY: usize = 50;

/// How long callers wait for the table lock before giving up.
pub const LOCK_TIMEOUT: Duration = Duration::from_millis(25);

/// A query that was forwarded upstream and is waiting for its answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingQuery {
    pub client: SocketAddr,
    pub id: u16,
    pub received_at: Instant,
}

/// Bounded FIFO of [`PendingQuery`] entries behind a single lock.
pub struct CorrelationTable {
    entries: Mutex<VecDeque<PendingQuery>>,
    capacity: usize,
    lock_timeout: Duration,
}

impl CorrelationTable {
    pub fn new(capacity: usize) -> Self {
        Self::with_lock_timeout(capacity, LOCK_TIMEOUT)
    }

    pub fn with_lock_timeout(capacity: usize, lock_timeout: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            lock_timeout,
        }
    }

    /// Remember that `client` is waiting for an answer to query `id`.
    ///
    /// Evicts the oldest entry when full. Returns [`LockTimeout`] if the
    /// lock could not be taken in time, in which case nothing was recorded.
    pub fn remember(
        &self,
        client: SocketAddr,
        id: u16,
        received_at: Instant,
    ) -> Result<(), LockTimeout> {
        let mut entries = self
            .entries
            .try_lock_for(self.lock_timeout)
            .ok_or(LockTimeout)?;

        if entries.len() >= self.capacity {
            if let Some(evicted) = entries.pop_front() {
                warn!(
                    id = evicted.id,
                    client = %evicted.client,
                    "correlation table full, dropping oldest pending query"
                );
            }
        }
        entries.push_back(PendingQuery {
            client,
            id,
            received_at,
        });

        Ok(())
    }

    /// Find and remove the oldest pending query with this `id`.
    ///
    /// A lock timeout is reported as no match, so the answer is dropped.
    pub fn resolve_and_consume(&self, id: u16) -> Option<PendingQuery> {
        let Some(mut entries) = self.entries.try_lock_for(self.lock_timeout) else {
            warn!(id, "timed out waiting for correlation table, dropping answer");
            return None;
        };

        let index = entries.iter().position(|entry| entry.id == id)?;
        entries.remove(index)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for CorrelationTable {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
