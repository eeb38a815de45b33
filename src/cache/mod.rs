//! Cache Module
//!
//! The cache entry engine: concurrent storage, expiry evaluation, event
//! dispatch, and statistics.

mod entry;
mod events;
mod expiry;
mod stats;
mod store;


// Re-export public types
pub use entry::CacheEntry;
pub use events::{EventDispatcher, EventKind, EventRecord, ListenerConfig, ListenerFn};
pub use expiry::{Clock, ExpiryData, ExpiryPolicy, ManualClock};
pub use stats::{CacheStats, StatsSnapshot};
pub use store::{Cache, CacheBuilder, MutableEntry};
