//! Statistics tracking for the resolver.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Atomic per-disposition counters, reset on every snapshot.
pub struct Stats {
    started: Instant,
    pub forwarded: AtomicU64,
    pub captured: AtomicU64,
    pub blocked: AtomicU64,
    pub relayed: AtomicU64,
    pub dropped: AtomicU64,
    /// Cumulative client-to-relay latency in microseconds for averaging.
    total_relay_time_us: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            forwarded: AtomicU64::new(0),
            captured: AtomicU64::new(0),
            blocked: AtomicU64::new(0),
            relayed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            total_relay_time_us: AtomicU64::new(0),
        }
    }

    pub fn record_forwarded(&self) {
        self.forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_captured(&self) {
        self.captured.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_blocked(&self) {
        self.blocked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_relayed(&self, latency: Duration) {
        self.relayed.fetch_add(1, Ordering::Relaxed);
        self.total_relay_time_us
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn snapshot_and_reset(&self) -> StatsSnapshot {
        let forwarded = self.forwarded.swap(0, Ordering::Relaxed);
        let captured = self.captured.swap(0, Ordering::Relaxed);
        let blocked = self.blocked.swap(0, Ordering::Relaxed);
        let relayed = self.relayed.swap(0, Ordering::Relaxed);
        let dropped = self.dropped.swap(0, Ordering::Relaxed);
        let total_us = self.total_relay_time_us.swap(0, Ordering::Relaxed);

        let avg_relay_ms = if relayed > 0 {
            (total_us as f64 / relayed as f64) / 1000.0
        } else {
            0.0
        };

        StatsSnapshot {
            uptime_secs: self.started.elapsed().as_secs(),
            forwarded,
            captured,
            blocked,
            relayed,
            dropped,
            avg_relay_ms,
        }
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatsSnapshot {
    pub uptime_secs: u64,
    pub forwarded: u64,
    pub captured: u64,
    pub blocked: u64,
    pub relayed: u64,
    pub dropped: u64,
    pub avg_relay_ms: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_counts_and_resets() {
        let stats = Stats::new();
        stats.record_forwarded();
        stats.record_forwarded();
        stats.record_blocked();
        stats.record_captured();
        stats.record_dropped();

        let snap = stats.snapshot_and_reset();
        assert_eq!(snap.forwarded, 2);
        assert_eq!(snap.blocked, 1);
        assert_eq!(snap.captured, 1);
        assert_eq!(snap.dropped, 1);

        let snap = stats.snapshot_and_reset();
        assert_eq!(snap.forwarded, 0);
        assert_eq!(snap.blocked, 0);
    }

    #[test]
    fn snapshot_averages_relay_latency() {
        let stats = Stats::new();
        stats.record_relayed(Duration::from_millis(10));
        stats.record_relayed(Duration::from_millis(30));

        let snap = stats.snapshot_and_reset();
        assert_eq!(snap.relayed, 2);
        assert!((snap.avg_relay_ms - 20.0).abs() < 1e-9);
    }

    #[test]
    fn empty_snapshot_has_zero_average() {
        let snap = Stats::new().snapshot_and_reset();

        assert_eq!(snap.avg_relay_ms, 0.0);
    }
}
