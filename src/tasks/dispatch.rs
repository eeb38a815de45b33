//! Event Dispatch Task
//!
//! Background task that periodically flushes buffered cache events to
//! registered listeners.

use std::hash::Hash;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::Cache;

/// Spawns a background task that flushes the cache's event queues at the
/// configured dispatch interval.
///
/// The task exits on its own once the cache is closed (the dispatcher is
/// stopped by `close()`); the returned handle can also be aborted directly
/// during shutdown.
///
/// # Arguments
/// * `cache` - The cache whose events to dispatch
///
/// # Returns
/// A JoinHandle for the spawned task.
pub fn spawn_dispatch_task<K, V>(cache: &Cache<K, V>) -> JoinHandle<()>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + PartialEq + Send + Sync + 'static,
{
    let interval = cache.config().dispatch_interval;
    let name = cache.name().to_string();
    let cache = cache.clone();

    tokio::spawn(async move {
        info!(
            cache = %name,
            interval_ms = interval.as_millis() as u64,
            "Starting event dispatch task"
        );

        loop {
            tokio::time::sleep(interval).await;

            if cache.dispatcher().is_stopped() {
                info!(cache = %name, "Event dispatch task stopping, cache closed");
                break;
            }

            let delivered = cache.flush_events();
            if delivered > 0 {
                debug!(cache = %name, delivered, "Dispatched event batch");
            }
        }
    })
}
