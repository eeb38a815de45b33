//! Cache Entry Module
//!
//! Composite record stored per key: the value together with its expiry
//! bookkeeping. Keeping both in one map entry means value and metadata are
//! always inserted and removed together, and every mutation is a single
//! atomic map operation.

use crate::cache::expiry::{ExpiryData, ExpiryPolicy};

// == Cache Entry ==
/// A stored value plus its expiry timestamps.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// The stored value
    pub value: V,
    /// Expiry bookkeeping for this entry
    pub expiry: ExpiryData,
}

impl<V> CacheEntry<V> {
    // == Constructor ==
    /// Creates an entry stamped as created at `now`.
    pub fn new(value: V, now: u64) -> Self {
        Self {
            value,
            expiry: ExpiryData::new(now),
        }
    }

    // == Is Expired ==
    /// Evaluates `policy` against this entry's timestamps at `now`.
    pub fn is_expired(&self, policy: &ExpiryPolicy, now: u64) -> bool {
        self.expiry.expired(policy, now)
    }

    // == Replace Value ==
    /// Swaps in a new value and records the update touch, returning the old
    /// value. The creation timestamp is preserved.
    pub fn replace_value(&mut self, value: V, now: u64) -> V {
        self.expiry.update(now);
        std::mem::replace(&mut self.value, value)
    }
}
