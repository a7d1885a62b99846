//! Tier hit/miss and refresh counters.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::read_path::Tier;

/// Cache statistics for monitoring.
#[derive(Debug, Default)]
pub struct CacheStatistics {
    /// Reads answered by the process tier
    pub process_hits: AtomicU64,
    /// Reads answered by the distributed tier
    pub distributed_hits: AtomicU64,
    /// Reads that had to go to the source store
    pub misses: AtomicU64,
    /// Distributed entries that failed to decode
    pub corrupt_entries: AtomicU64,
    /// Distributed tier errors absorbed by the read path or orchestrator
    pub distributed_errors: AtomicU64,
    /// Successful recomputes
    pub refreshes: AtomicU64,
    /// Recomputes that failed at the source store
    pub refresh_failures: AtomicU64,
    /// Page keys dropped after a change notification
    pub invalidations: AtomicU64,
}

impl CacheStatistics {
    pub(crate) fn record_hit(&self, tier: Tier) {
        let counter = match tier {
            Tier::Process => &self.process_hits,
            Tier::Distributed => &self.distributed_hits,
            Tier::Source => &self.misses,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Share of reads answered without touching the source store.
    pub fn hit_ratio(&self) -> f64 {
        let hits = (self.process_hits.load(Ordering::Relaxed)
            + self.distributed_hits.load(Ordering::Relaxed)) as f64;
        let misses = self.misses.load(Ordering::Relaxed) as f64;
        let total = hits + misses;

        if total == 0.0 { 0.0 } else { hits / total }
    }

    /// Get a snapshot of current statistics.
    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            process_hits: self.process_hits.load(Ordering::Relaxed),
            distributed_hits: self.distributed_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            corrupt_entries: self.corrupt_entries.load(Ordering::Relaxed),
            distributed_errors: self.distributed_errors.load(Ordering::Relaxed),
            refreshes: self.refreshes.load(Ordering::Relaxed),
            refresh_failures: self.refresh_failures.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            hit_ratio: self.hit_ratio(),
        }
    }
}

/// A point-in-time snapshot of cache statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStatsSnapshot {
    pub process_hits: u64,
    pub distributed_hits: u64,
    pub misses: u64,
    pub corrupt_entries: u64,
    pub distributed_errors: u64,
    pub refreshes: u64,
    pub refresh_failures: u64,
    pub invalidations: u64,
    pub hit_ratio: f64,
}
