//! nearcache - An embeddable in-process key-value cache engine
//!
//! Provides a concurrency-safe cache with time-based expiration, optional
//! read-through/write-through synchronization, asynchronous batched change
//! notification, and runtime statistics.

pub mod cache;
pub mod config;
pub mod error;
pub mod integration;
pub mod tasks;

pub use cache::{Cache, CacheBuilder, EventKind, EventRecord, ExpiryPolicy, ListenerConfig};
pub use config::CacheConfig;
pub use error::{CacheError, Result};
pub use tasks::spawn_dispatch_task;
