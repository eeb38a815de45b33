//! Configuration Module
//!
//! Construction-time settings for a cache instance. All fields are read-only
//! after the cache is built.

use std::time::Duration;

use crate::cache::ExpiryPolicy;

// == Cache Config ==
/// Per-cache configuration parameters.
///
/// A config is consumed once at construction; toggling these fields afterwards
/// has no effect on an already-built cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Fetch missing values from the loader on cache miss
    pub read_through: bool,
    /// Propagate mutations to the writer
    pub write_through: bool,
    /// Deep-copy values on write so callers cannot alias cached state
    pub store_by_value: bool,
    /// Maintain runtime statistics counters
    pub statistics: bool,
    /// Expiry policy applied to every entry
    pub expiry: ExpiryPolicy,
    /// Interval between background event dispatch flushes
    pub dispatch_interval: Duration,
}

impl CacheConfig {
    /// Creates a config with the default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables read-through via the configured loader.
    pub fn with_read_through(mut self, enabled: bool) -> Self {
        self.read_through = enabled;
        self
    }

    /// Enables write-through via the configured writer.
    pub fn with_write_through(mut self, enabled: bool) -> Self {
        self.write_through = enabled;
        self
    }

    /// Enables store-by-value isolation.
    pub fn with_store_by_value(mut self, enabled: bool) -> Self {
        self.store_by_value = enabled;
        self
    }

    /// Enables statistics counters.
    pub fn with_statistics(mut self, enabled: bool) -> Self {
        self.statistics = enabled;
        self
    }

    /// Sets the expiry policy.
    pub fn with_expiry(mut self, expiry: ExpiryPolicy) -> Self {
        self.expiry = expiry;
        self
    }

    /// Sets the background dispatch flush interval.
    pub fn with_dispatch_interval(mut self, interval: Duration) -> Self {
        self.dispatch_interval = interval;
        self
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            read_through: false,
            write_through: false,
            store_by_value: false,
            statistics: false,
            expiry: ExpiryPolicy::Eternal,
            dispatch_interval: Duration::from_millis(500),
        }
    }
}
