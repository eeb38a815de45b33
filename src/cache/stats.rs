//! Cache Statistics Module
//!
//! Tracks cache performance metrics as monotonically-incrementing atomic
//! counters, updated inline by the engine.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

// == Cache Stats ==
/// Atomic counter bundle for a single cache instance.
///
/// Present only when statistics are enabled at construction; never enabled or
/// disabled retroactively.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    gets: AtomicU64,
    puts: AtomicU64,
    removals: AtomicU64,
    evictions: AtomicU64,
    read_throughs: AtomicU64,
    write_throughs: AtomicU64,
    remove_throughs: AtomicU64,
}

impl CacheStats {
    // == Constructor ==
    /// Creates a new CacheStats with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    // == Recorders ==
    /// Increments the hit counter.
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Increments the miss counter.
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Increments the get counter.
    pub fn record_get(&self) {
        self.gets.fetch_add(1, Ordering::Relaxed);
    }

    /// Increments the put counter.
    pub fn record_put(&self) {
        self.puts.fetch_add(1, Ordering::Relaxed);
    }

    /// Increments the removal counter.
    pub fn record_removal(&self) {
        self.removals.fetch_add(1, Ordering::Relaxed);
    }

    /// Increments the eviction counter.
    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    /// Increments the read-through counter.
    pub fn record_read_through(&self) {
        self.read_throughs.fetch_add(1, Ordering::Relaxed);
    }

    /// Increments the write-through counter.
    pub fn record_write_through(&self) {
        self.write_throughs.fetch_add(1, Ordering::Relaxed);
    }

    /// Increments the remove-through counter.
    pub fn record_remove_through(&self) {
        self.remove_throughs.fetch_add(1, Ordering::Relaxed);
    }

    // == Clear ==
    /// Resets all counters to zero.
    pub fn clear(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.gets.store(0, Ordering::Relaxed);
        self.puts.store(0, Ordering::Relaxed);
        self.removals.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.read_throughs.store(0, Ordering::Relaxed);
        self.write_throughs.store(0, Ordering::Relaxed);
        self.remove_throughs.store(0, Ordering::Relaxed);
    }

    // == Snapshot ==
    /// Returns a point-in-time copy of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            gets: self.gets.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
            removals: self.removals.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            read_throughs: self.read_throughs.load(Ordering::Relaxed),
            write_throughs: self.write_throughs.load(Ordering::Relaxed),
            remove_throughs: self.remove_throughs.load(Ordering::Relaxed),
        }
    }
}

// == Stats Snapshot ==
/// Immutable copy of the statistics counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Number of successful cache retrievals
    pub hits: u64,
    /// Number of failed cache retrievals (key absent or expired)
    pub misses: u64,
    /// Number of get operations, regardless of outcome
    pub gets: u64,
    /// Number of put operations
    pub puts: u64,
    /// Number of explicit removals
    pub removals: u64,
    /// Number of entries evicted by the expiry policy
    pub evictions: u64,
    /// Number of loader invocations
    pub read_throughs: u64,
    /// Number of writer write invocations
    pub write_throughs: u64,
    /// Number of writer delete invocations
    pub remove_throughs: u64,
}

impl StatsSnapshot {
    // == Hit Rate ==
    /// Calculates the cache hit rate.
    ///
    /// Returns hits / (hits + misses), or 0.0 if no requests have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
