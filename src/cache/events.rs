//! Event Dispatcher Module
//!
//! Buffers mutation events per event kind and delivers them in ordered
//! batches to registered listeners. Enqueueing never blocks on delivery;
//! the flush is driven by a background task (see `tasks::spawn_dispatch_task`).
//!
//! Delivery is at-most-once and best-effort: a listener registered after an
//! event was enqueued never sees that event, and events still buffered when
//! the cache closes are dropped.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::warn;

use crate::error::{CacheError, Result};

// == Event Kind ==
/// Kind of cache mutation an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A key was inserted that was not previously present
    Created,
    /// An existing key's value was replaced
    Updated,
    /// A key was explicitly removed
    Removed,
    /// A key was evicted by the expiry policy
    Expired,
}

impl EventKind {
    /// All kinds, in queue index order.
    pub const ALL: [EventKind; 4] = [
        EventKind::Created,
        EventKind::Updated,
        EventKind::Removed,
        EventKind::Expired,
    ];

    fn index(self) -> usize {
        match self {
            EventKind::Created => 0,
            EventKind::Updated => 1,
            EventKind::Removed => 2,
            EventKind::Expired => 3,
        }
    }
}

// == Event Record ==
/// A single buffered mutation event.
///
/// `value` is the post-mutation value (None for removals and expirations);
/// `old_value` is the pre-mutation value where one existed. Records are
/// implicitly timestamped by enqueue order.
#[derive(Debug, Clone)]
pub struct EventRecord<K, V> {
    /// The kind of mutation
    pub kind: EventKind,
    /// The affected key
    pub key: K,
    /// New value, if the mutation produced one
    pub value: Option<V>,
    /// Previous value, if one existed
    pub old_value: Option<V>,
}

// == Listener Callback ==
/// Batch-delivery callback invoked once per flush with all pending records
/// of the listener's kind, oldest first.
pub type ListenerFn<K, V> = Arc<dyn Fn(&[EventRecord<K, V>]) + Send + Sync>;

// == Listener Config ==
/// Registration request for a cache entry listener.
///
/// The `name` is the listener's identity: registering two configs with the
/// same name is rejected as an invalid argument.
#[derive(Clone)]
pub struct ListenerConfig<K, V> {
    /// Identity used for deduplication
    pub name: String,
    /// The single event kind this listener receives
    pub kind: EventKind,
    /// Batch callback
    pub callback: ListenerFn<K, V>,
}

impl<K, V> ListenerConfig<K, V> {
    /// Creates a listener config.
    pub fn new(
        name: impl Into<String>,
        kind: EventKind,
        callback: impl Fn(&[EventRecord<K, V>]) + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            callback: Arc::new(callback),
        }
    }
}

impl<K, V> std::fmt::Debug for ListenerConfig<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerConfig")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}

// == Event Dispatcher ==
/// Per-cache event buffering and batch delivery.
///
/// One append-only queue per event kind; concurrent producers contend only on
/// the queue of the kind they emit. `flush` drains each non-empty queue and
/// hands the batch to every listener of that kind.
pub struct EventDispatcher<K, V> {
    queues: [Mutex<Vec<EventRecord<K, V>>>; 4],
    listeners: RwLock<Vec<ListenerConfig<K, V>>>,
    stopped: AtomicBool,
}

impl<K, V> Default for EventDispatcher<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> EventDispatcher<K, V> {
    // == Constructor ==
    /// Creates a dispatcher with no listeners and empty queues.
    pub fn new() -> Self {
        Self {
            queues: [
                Mutex::new(Vec::new()),
                Mutex::new(Vec::new()),
                Mutex::new(Vec::new()),
                Mutex::new(Vec::new()),
            ],
            listeners: RwLock::new(Vec::new()),
            stopped: AtomicBool::new(false),
        }
    }

    // == Register ==
    /// Registers a listener for its configured event kind.
    ///
    /// Fails with `InvalidArgument` if a listener with the same name is
    /// already registered.
    pub fn register(&self, config: ListenerConfig<K, V>) -> Result<()> {
        let mut listeners = self.listeners.write();
        if listeners.iter().any(|l| l.name == config.name) {
            return Err(CacheError::InvalidArgument(format!(
                "Listener already registered: {}",
                config.name
            )));
        }
        listeners.push(config);
        Ok(())
    }

    // == Deregister ==
    /// Removes a listener by name. Returns whether one was removed.
    pub fn deregister(&self, name: &str) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| l.name != name);
        listeners.len() < before
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    // == Enqueue ==
    /// Appends an event record to its kind's queue.
    ///
    /// O(1) and safe for concurrent producers; never blocks on delivery.
    /// Events enqueued after the dispatcher is stopped are silently dropped.
    pub fn event(&self, kind: EventKind, key: K, value: Option<V>, old_value: Option<V>) {
        if self.stopped.load(Ordering::Acquire) {
            return;
        }
        self.queues[kind.index()].lock().push(EventRecord {
            kind,
            key,
            value,
            old_value,
        });
    }

    // == Flush ==
    /// Drains every non-empty queue and delivers each batch, oldest first,
    /// to all listeners of the matching kind.
    ///
    /// A panicking listener is isolated: the panic is caught and logged, and
    /// remaining listeners still receive the batch. Returns the number of
    /// records delivered.
    pub fn flush(&self) -> usize {
        let mut delivered = 0;

        for kind in EventKind::ALL {
            let batch = std::mem::take(&mut *self.queues[kind.index()].lock());
            if batch.is_empty() {
                continue;
            }
            delivered += batch.len();

            // Snapshot the registrations so a listener that registers or
            // deregisters from its callback cannot deadlock the flush.
            let targets: Vec<(String, ListenerFn<K, V>)> = self
                .listeners
                .read()
                .iter()
                .filter(|l| l.kind == kind)
                .map(|l| (l.name.clone(), l.callback.clone()))
                .collect();

            for (name, callback) in targets {
                if catch_unwind(AssertUnwindSafe(|| callback(&batch))).is_err() {
                    warn!(listener = %name, "Event listener panicked during dispatch");
                }
            }
        }

        delivered
    }

    // == Stop ==
    /// Stops the dispatcher: pending and future events are dropped.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        for queue in &self.queues {
            queue.lock().clear();
        }
    }

    /// Whether the dispatcher has been stopped.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}
