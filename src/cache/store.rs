//! Cache Engine Module
//!
//! The concurrent key-value engine. Owns a single sharded map of composite
//! entries (value plus expiry data), orchestrates every public operation,
//! consults the expiry evaluator, maintains statistics, emits events to the
//! dispatcher, and delegates to the injected read-through / write-through
//! collaborators.
//!
//! `Cache` is a cheap-clone handle; all clones share one engine instance.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info};

use crate::cache::entry::CacheEntry;
use crate::cache::events::{EventDispatcher, EventKind, ListenerConfig};
use crate::cache::expiry::Clock;
use crate::cache::stats::{CacheStats, StatsSnapshot};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::integration::{CacheLoader, CacheWriter, CloningCopier, ManagerHandle, ValueCopier};

// == Shared Engine State ==
struct CacheInner<K, V> {
    name: String,
    config: CacheConfig,
    map: DashMap<K, CacheEntry<V>>,
    dispatcher: EventDispatcher<K, V>,
    stats: Option<CacheStats>,
    loader: Option<Arc<dyn CacheLoader<K, V>>>,
    writer: Option<Arc<dyn CacheWriter<K, V>>>,
    copier: Arc<dyn ValueCopier<V>>,
    manager: Option<Arc<dyn ManagerHandle>>,
    clock: Clock,
    closed: AtomicBool,
}

// == Cache ==
/// Handle to a shared cache engine instance.
///
/// Cloning is cheap (Arc) and every clone operates on the same storage,
/// statistics, and event queues. The engine transitions `Open -> Closed`
/// exactly once; after `close()` every operation except introspection fails
/// with [`CacheError::Closed`].
pub struct Cache<K, V> {
    inner: Arc<CacheInner<K, V>>,
}

impl<K, V> Clone for Cache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K, V> std::fmt::Debug for Cache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("name", &self.inner.name)
            .field("closed", &self.inner.closed.load(Ordering::Acquire))
            .finish()
    }
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + PartialEq + Send + Sync + 'static,
{
    // == Builder ==
    /// Starts building a cache with the given name.
    pub fn builder(name: impl Into<String>) -> CacheBuilder<K, V> {
        CacheBuilder::new(name)
    }

    // == Get ==
    /// Retrieves a value by key.
    ///
    /// An expired entry is evicted before lookup. A hit refreshes the
    /// `accessed` timestamp; a miss attempts read-through when configured.
    /// The get counter is incremented once per call regardless of outcome.
    pub fn get(&self, key: &K) -> Result<Option<V>> {
        self.ensure_open()?;
        self.record(|s| s.record_get());
        self.evict_if_expired(key);

        let now = self.inner.clock.now();
        let found = self.inner.map.get_mut(key).map(|mut entry| {
            entry.expiry.access(now);
            entry.value.clone()
        });

        match found {
            Some(value) => {
                self.record(|s| s.record_hit());
                Ok(Some(value))
            }
            None => {
                self.record(|s| s.record_miss());
                self.read_through(key)
            }
        }
    }

    // == Get All ==
    /// Per-key `get`; keys that resolve to no value are omitted from the
    /// result mapping.
    pub fn get_all(&self, keys: &[K]) -> Result<HashMap<K, V>> {
        self.ensure_open()?;
        let mut out = HashMap::new();
        for key in keys {
            if let Some(value) = self.get(key)? {
                out.insert(key.clone(), value);
            }
        }
        Ok(out)
    }

    // == Contains Key ==
    /// Presence check in the value map only; no expiry or statistics side
    /// effects.
    pub fn contains_key(&self, key: &K) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.inner.map.contains_key(key))
    }

    // == Put ==
    /// Stores a value, overwriting any previous one.
    pub fn put(&self, key: K, value: V) -> Result<()> {
        self.get_and_put(key, value).map(|_| ())
    }

    // == Get And Put ==
    /// Stores a value and returns the previous one, if any.
    ///
    /// Emits `Created` when the key was absent, `Updated` otherwise, then
    /// invokes write-through. Counts one get and one put.
    pub fn get_and_put(&self, key: K, value: V) -> Result<Option<V>> {
        self.ensure_open()?;
        self.record(|s| {
            s.record_get();
            s.record_put();
        });
        self.evict_if_expired(&key);

        let value = self.copy_on_write(value)?;
        let now = self.inner.clock.now();
        let old = match self.inner.map.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                Some(occupied.get_mut().replace_value(value.clone(), now))
            }
            Entry::Vacant(vacant) => {
                vacant.insert(CacheEntry::new(value.clone(), now));
                None
            }
        };

        self.write_through(&key, &value)?;
        match &old {
            Some(previous) => self.inner.dispatcher.event(
                EventKind::Updated,
                key,
                Some(value),
                Some(previous.clone()),
            ),
            None => self
                .inner
                .dispatcher
                .event(EventKind::Created, key, Some(value), None),
        }
        Ok(old)
    }

    // == Put All ==
    /// Stores every entry via the `put` path.
    pub fn put_all(&self, entries: Vec<(K, V)>) -> Result<()> {
        self.ensure_open()?;
        for (key, value) in entries {
            self.put(key, value)?;
        }
        Ok(())
    }

    // == Put If Absent ==
    /// Atomically inserts the value only if the key is absent.
    ///
    /// On success performs the same side effects as `put` (event,
    /// write-through, fresh metadata). Returns whether the insert happened.
    pub fn put_if_absent(&self, key: K, value: V) -> Result<bool> {
        self.ensure_open()?;
        self.evict_if_expired(&key);

        let value = self.copy_on_write(value)?;
        let now = self.inner.clock.now();
        let inserted = match self.inner.map.entry(key.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                vacant.insert(CacheEntry::new(value.clone(), now));
                true
            }
        };

        if inserted {
            self.record(|s| s.record_put());
            self.write_through(&key, &value)?;
            self.inner
                .dispatcher
                .event(EventKind::Created, key, Some(value), None);
        }
        Ok(inserted)
    }

    // == Remove ==
    /// Removes an entry. Returns whether one was removed.
    ///
    /// On success invokes the write-through delete and emits `Removed`.
    pub fn remove(&self, key: &K) -> Result<bool> {
        self.ensure_open()?;
        match self.inner.map.remove(key) {
            Some((removed_key, entry)) => {
                self.record(|s| s.record_removal());
                self.remove_through(key)?;
                self.inner
                    .dispatcher
                    .event(EventKind::Removed, removed_key, None, Some(entry.value));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // == Remove If Equals ==
    /// Compare-and-remove: removes the entry only if the stored value equals
    /// `expected`.
    pub fn remove_if_equals(&self, key: &K, expected: &V) -> Result<bool> {
        self.ensure_open()?;
        match self
            .inner
            .map
            .remove_if(key, |_, entry| entry.value == *expected)
        {
            Some((removed_key, entry)) => {
                self.record(|s| s.record_removal());
                self.remove_through(key)?;
                self.inner
                    .dispatcher
                    .event(EventKind::Removed, removed_key, None, Some(entry.value));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // == Get And Remove ==
    /// Reads then removes; returns the pre-removal value (None if absent).
    pub fn get_and_remove(&self, key: &K) -> Result<Option<V>> {
        let value = self.get(key)?;
        self.remove(key)?;
        Ok(value)
    }

    // == Replace ==
    /// Replaces the value only if the key is present. No implicit creation.
    pub fn replace(&self, key: &K, value: V) -> Result<bool> {
        self.ensure_open()?;
        let value = self.copy_on_write(value)?;
        let now = self.inner.clock.now();
        let old = self
            .inner
            .map
            .get_mut(key)
            .map(|mut entry| entry.replace_value(value.clone(), now));

        match old {
            Some(previous) => {
                self.write_through(key, &value)?;
                self.inner.dispatcher.event(
                    EventKind::Updated,
                    key.clone(),
                    Some(value),
                    Some(previous),
                );
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // == Replace If Equals ==
    /// Replaces the value only if the stored value equals `expected`.
    pub fn replace_if_equals(&self, key: &K, expected: &V, value: V) -> Result<bool> {
        self.ensure_open()?;
        let value = self.copy_on_write(value)?;
        let now = self.inner.clock.now();
        let mut old = None;
        if let Some(mut entry) = self.inner.map.get_mut(key) {
            if entry.value == *expected {
                old = Some(entry.replace_value(value.clone(), now));
            }
        }

        match old {
            Some(previous) => {
                self.write_through(key, &value)?;
                self.inner.dispatcher.event(
                    EventKind::Updated,
                    key.clone(),
                    Some(value),
                    Some(previous),
                );
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // == Get And Replace ==
    /// Swaps in a new value if the key is present, returning the old value.
    ///
    /// Performs an expiry check and access-touch before swapping, and counts
    /// a get when the key is present.
    pub fn get_and_replace(&self, key: &K, value: V) -> Result<Option<V>> {
        self.ensure_open()?;
        self.evict_if_expired(key);

        let value = self.copy_on_write(value)?;
        let now = self.inner.clock.now();
        let mut old = None;
        if let Some(mut entry) = self.inner.map.get_mut(key) {
            entry.expiry.access(now);
            old = Some(entry.replace_value(value.clone(), now));
        }

        if let Some(previous) = &old {
            self.record(|s| s.record_get());
            self.write_through(key, &value)?;
            self.inner.dispatcher.event(
                EventKind::Updated,
                key.clone(),
                Some(value),
                Some(previous.clone()),
            );
        }
        Ok(old)
    }

    // == Remove All ==
    /// Removes every entry through the per-key `remove` path, so events are
    /// emitted and write-through deletes are invoked.
    pub fn remove_all(&self) -> Result<()> {
        self.ensure_open()?;
        let keys: Vec<K> = self.inner.map.iter().map(|e| e.key().clone()).collect();
        self.remove_all_keys(&keys)
    }

    /// Removes the given keys through the per-key `remove` path.
    pub fn remove_all_keys(&self, keys: &[K]) -> Result<()> {
        self.ensure_open()?;
        for key in keys {
            self.remove(key)?;
        }
        Ok(())
    }

    // == Clear ==
    /// Hard reset: drops every entry without events, write-through, or
    /// statistics updates.
    pub fn clear(&self) -> Result<()> {
        self.ensure_open()?;
        self.inner.map.clear();
        Ok(())
    }

    // == Load All ==
    /// Asynchronously loads the given keys through the read-through path.
    ///
    /// Runs on a blocking task so a slow loader does not stall the caller.
    /// Keys already present are evicted first when `replace_existing` is set.
    /// The first error stops the batch and is delivered to `on_complete`;
    /// callers must not assume completion when this method returns.
    ///
    /// Must be called from within a tokio runtime.
    pub fn load_all<F>(&self, keys: Vec<K>, replace_existing: bool, on_complete: F) -> Result<()>
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        self.ensure_open()?;
        let cache = self.clone();
        tokio::task::spawn_blocking(move || {
            let outcome = cache.load_all_blocking(&keys, replace_existing);
            on_complete(outcome);
        });
        Ok(())
    }

    fn load_all_blocking(&self, keys: &[K], replace_existing: bool) -> Result<()> {
        for key in keys {
            if replace_existing && self.contains_key(key)? {
                self.evict(key);
            }
            self.get(key)?;
        }
        debug!(cache = %self.inner.name, count = keys.len(), "loadAll batch finished");
        Ok(())
    }

    // == Invoke ==
    /// Runs an entry processor against a mutable view of the given key.
    ///
    /// The view proxies `exists` / `value` / `set_value` / `remove` to this
    /// engine's own operations; the processor's result is returned as-is.
    pub fn invoke<T>(
        &self,
        key: K,
        processor: impl FnOnce(&mut MutableEntry<'_, K, V>) -> Result<T>,
    ) -> Result<T> {
        self.ensure_open()?;
        let mut entry = MutableEntry { cache: self, key };
        processor(&mut entry)
    }

    // == Invoke All ==
    /// Runs the processor once per key, omitting keys with no live entry.
    ///
    /// Results are evaluated eagerly, in key order.
    pub fn invoke_all<T>(
        &self,
        keys: Vec<K>,
        processor: impl Fn(&mut MutableEntry<'_, K, V>) -> Result<T>,
    ) -> Result<HashMap<K, T>> {
        self.ensure_open()?;
        let mut results = HashMap::new();
        for key in keys {
            self.evict_if_expired(&key);
            if !self.inner.map.contains_key(&key) {
                continue;
            }
            let mut entry = MutableEntry {
                cache: self,
                key: key.clone(),
            };
            let result = processor(&mut entry)?;
            results.insert(key, result);
        }
        Ok(results)
    }

    // == Listener Registration ==
    /// Registers a cache entry listener; a config with an already-registered
    /// name is rejected with `InvalidArgument`.
    pub fn register_listener(&self, config: ListenerConfig<K, V>) -> Result<()> {
        self.ensure_open()?;
        self.inner.dispatcher.register(config)
    }

    /// Deregisters a listener by name. Returns whether one was removed.
    pub fn deregister_listener(&self, name: &str) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.inner.dispatcher.deregister(name))
    }

    // == Flush Events ==
    /// Drains pending events and delivers batches to listeners immediately.
    ///
    /// Normally driven by the background dispatch task; exposed for callers
    /// that need deterministic delivery.
    pub fn flush_events(&self) -> usize {
        self.inner.dispatcher.flush()
    }

    // == Statistics ==
    /// Snapshot of the statistics counters, if statistics are enabled.
    pub fn stats(&self) -> Option<StatsSnapshot> {
        self.inner.stats.as_ref().map(CacheStats::snapshot)
    }

    /// Resets all statistics counters to zero.
    pub fn stats_clear(&self) {
        if let Some(stats) = &self.inner.stats {
            stats.clear();
        }
    }

    // == Close ==
    /// Closes the cache: clears storage, stops event dispatch (pending
    /// events are dropped), and notifies the owning manager unless the
    /// manager is itself closed. Idempotent; only the first call acts.
    pub fn close(&self) {
        if self
            .inner
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.inner.map.clear();
            self.inner.dispatcher.stop();
            if let Some(manager) = &self.inner.manager {
                if !manager.is_closed() {
                    manager.release(&self.inner.name);
                }
            }
            info!(cache = %self.inner.name, "Cache closed");
        }
    }

    /// Whether `close()` has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    // == Introspection ==
    /// The cache's name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The configuration this cache was built with.
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Current number of live entries.
    pub fn len(&self) -> usize {
        self.inner.map.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.inner.map.is_empty()
    }

    // == Entries ==
    /// Point-in-time snapshot of all live entries.
    pub fn entries(&self) -> Result<Vec<(K, V)>> {
        self.ensure_open()?;
        Ok(self
            .inner
            .map
            .iter()
            .map(|e| (e.key().clone(), e.value().value.clone()))
            .collect())
    }

    pub(crate) fn dispatcher(&self) -> &EventDispatcher<K, V> {
        &self.inner.dispatcher
    }

    // == Internal Helpers ==
    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(CacheError::Closed(self.inner.name.clone()))
        } else {
            Ok(())
        }
    }

    fn record(&self, f: impl FnOnce(&CacheStats)) {
        if let Some(stats) = &self.inner.stats {
            f(stats);
        }
    }

    /// Evicts the entry when the expiry policy judges it expired.
    fn evict_if_expired(&self, key: &K) {
        let now = self.inner.clock.now();
        let policy = &self.inner.config.expiry;
        if let Some((removed_key, entry)) = self
            .inner
            .map
            .remove_if(key, |_, entry| entry.is_expired(policy, now))
        {
            self.record(|s| s.record_eviction());
            self.inner
                .dispatcher
                .event(EventKind::Expired, removed_key, None, Some(entry.value));
        }
    }

    /// Unconditional eviction, used by `load_all` with `replace_existing`.
    fn evict(&self, key: &K) {
        if let Some((removed_key, entry)) = self.inner.map.remove(key) {
            self.record(|s| s.record_eviction());
            self.inner
                .dispatcher
                .event(EventKind::Expired, removed_key, None, Some(entry.value));
        }
    }

    /// On a miss, consults the loader and silently populates the cache.
    ///
    /// A populated value gets fresh metadata but no Created event and no
    /// write-through: the external store is its origin.
    fn read_through(&self, key: &K) -> Result<Option<V>> {
        if !self.inner.config.read_through {
            return Ok(None);
        }
        let Some(loader) = &self.inner.loader else {
            return Ok(None);
        };

        self.record(|s| s.record_read_through());
        let loaded = loader.load(key)?;
        if let Some(value) = &loaded {
            let now = self.inner.clock.now();
            self.inner
                .map
                .insert(key.clone(), CacheEntry::new(value.clone(), now));
        }
        Ok(loaded)
    }

    fn write_through(&self, key: &K, value: &V) -> Result<()> {
        if !self.inner.config.write_through {
            return Ok(());
        }
        let Some(writer) = &self.inner.writer else {
            return Ok(());
        };
        self.record(|s| s.record_write_through());
        writer.write(key, value)
    }

    fn remove_through(&self, key: &K) -> Result<()> {
        if !self.inner.config.write_through {
            return Ok(());
        }
        let Some(writer) = &self.inner.writer else {
            return Ok(());
        };
        self.record(|s| s.record_remove_through());
        writer.delete(key)
    }

    fn copy_on_write(&self, value: V) -> Result<V> {
        if self.inner.config.store_by_value {
            self.inner.copier.deep_copy(&value)
        } else {
            Ok(value)
        }
    }
}

// == Mutable Entry ==
/// Mutable view over one key, handed to entry processors by `invoke` and
/// `invoke_all`. Holds no storage of its own; every method proxies to the
/// engine.
pub struct MutableEntry<'a, K, V> {
    cache: &'a Cache<K, V>,
    key: K,
}

impl<K, V> MutableEntry<'_, K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + PartialEq + Send + Sync + 'static,
{
    /// The key this view is bound to.
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Whether a live entry exists for the key.
    pub fn exists(&self) -> Result<bool> {
        self.cache.contains_key(&self.key)
    }

    /// Reads the current value through the engine's `get` path.
    pub fn value(&self) -> Result<Option<V>> {
        self.cache.get(&self.key)
    }

    /// Writes a value through the engine's `put` path.
    pub fn set_value(&mut self, value: V) -> Result<()> {
        self.cache.put(self.key.clone(), value)
    }

    /// Removes the entry through the engine's `remove` path.
    pub fn remove(&mut self) -> Result<bool> {
        self.cache.remove(&self.key)
    }
}

// == Cache Builder ==
/// Assembles a cache from its configuration and injected collaborators.
pub struct CacheBuilder<K, V> {
    name: String,
    config: CacheConfig,
    loader: Option<Arc<dyn CacheLoader<K, V>>>,
    writer: Option<Arc<dyn CacheWriter<K, V>>>,
    copier: Option<Arc<dyn ValueCopier<V>>>,
    manager: Option<Arc<dyn ManagerHandle>>,
    clock: Clock,
    listeners: Vec<ListenerConfig<K, V>>,
}

impl<K, V> CacheBuilder<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + PartialEq + Send + Sync + 'static,
{
    /// Starts a builder for a cache with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: CacheConfig::default(),
            loader: None,
            writer: None,
            copier: None,
            manager: None,
            clock: Clock::system(),
            listeners: Vec::new(),
        }
    }

    /// Sets the configuration.
    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Injects the read-through loader.
    pub fn loader(mut self, loader: impl CacheLoader<K, V> + 'static) -> Self {
        self.loader = Some(Arc::new(loader));
        self
    }

    /// Injects the write-through writer.
    pub fn writer(mut self, writer: impl CacheWriter<K, V> + 'static) -> Self {
        self.writer = Some(Arc::new(writer));
        self
    }

    /// Injects the store-by-value copier. Defaults to [`CloningCopier`].
    pub fn copier(mut self, copier: impl ValueCopier<V> + 'static) -> Self {
        self.copier = Some(Arc::new(copier));
        self
    }

    /// Injects the owning manager's close hook.
    pub fn manager(mut self, manager: Arc<dyn ManagerHandle>) -> Self {
        self.manager = Some(manager);
        self
    }

    /// Overrides the time source. Defaults to the system clock.
    pub fn clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Pre-installs a listener at construction time.
    pub fn listener(mut self, config: ListenerConfig<K, V>) -> Self {
        self.listeners.push(config);
        self
    }

    /// Builds the cache. Fails if pre-installed listeners collide by name.
    pub fn build(self) -> Result<Cache<K, V>> {
        let dispatcher = EventDispatcher::new();
        for listener in self.listeners {
            dispatcher.register(listener)?;
        }

        let stats = self.config.statistics.then(CacheStats::new);

        Ok(Cache {
            inner: Arc::new(CacheInner {
                name: self.name,
                config: self.config,
                map: DashMap::new(),
                dispatcher,
                stats,
                loader: self.loader,
                writer: self.writer,
                copier: self.copier.unwrap_or_else(|| Arc::new(CloningCopier)),
                manager: self.manager,
                clock: self.clock,
                closed: AtomicBool::new(false),
            }),
        })
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::expiry::{ExpiryPolicy, ManualClock};
    use parking_lot::Mutex;
    use std::time::Duration;

    fn basic_cache() -> Cache<String, String> {
        Cache::builder("test")
            .config(CacheConfig::new().with_statistics(true))
            .build()
            .unwrap()
    }

    fn cache_with_clock(policy: ExpiryPolicy) -> (Cache<String, String>, ManualClock) {
        let manual = ManualClock::new();
        let cache = Cache::builder("test")
            .config(CacheConfig::new().with_statistics(true).with_expiry(policy))
            .clock(manual.clock())
            .build()
            .unwrap();
        (cache, manual)
    }

    // == Mock Collaborators ==

    struct MapLoader {
        values: HashMap<String, String>,
    }

    impl CacheLoader<String, String> for MapLoader {
        fn load(&self, key: &String) -> Result<Option<String>> {
            Ok(self.values.get(key).cloned())
        }
    }

    struct FailingLoader;

    impl CacheLoader<String, String> for FailingLoader {
        fn load(&self, _key: &String) -> Result<Option<String>> {
            Err(CacheError::Loader("backend unavailable".to_string()))
        }
    }

    #[derive(Default)]
    struct RecordingWriter {
        writes: Mutex<Vec<(String, String)>>,
        deletes: Mutex<Vec<String>>,
    }

    impl CacheWriter<String, String> for Arc<RecordingWriter> {
        fn write(&self, key: &String, value: &String) -> Result<()> {
            self.writes.lock().push((key.clone(), value.clone()));
            Ok(())
        }

        fn delete(&self, key: &String) -> Result<()> {
            self.deletes.lock().push(key.clone());
            Ok(())
        }
    }

    // == Basic Operations ==

    #[test]
    fn test_put_get_round_trip() {
        let cache = basic_cache();

        cache.put("k".to_string(), "v".to_string()).unwrap();

        assert_eq!(cache.get(&"k".to_string()).unwrap(), Some("v".to_string()));
        assert!(cache.contains_key(&"k".to_string()).unwrap());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_get_absent() {
        let cache = basic_cache();
        assert_eq!(cache.get(&"missing".to_string()).unwrap(), None);
    }

    #[test]
    fn test_get_all_omits_absent() {
        let cache = basic_cache();
        cache.put("a".to_string(), "1".to_string()).unwrap();
        cache.put("b".to_string(), "2".to_string()).unwrap();

        let all = cache
            .get_all(&["a".to_string(), "b".to_string(), "c".to_string()])
            .unwrap();

        assert_eq!(all.len(), 2);
        assert_eq!(all["a"], "1");
        assert_eq!(all["b"], "2");
    }

    #[test]
    fn test_get_and_put_returns_previous() {
        let cache = basic_cache();

        assert_eq!(
            cache.get_and_put("k".to_string(), "v1".to_string()).unwrap(),
            None
        );
        assert_eq!(
            cache.get_and_put("k".to_string(), "v2".to_string()).unwrap(),
            Some("v1".to_string())
        );
    }

    #[test]
    fn test_put_all() {
        let cache = basic_cache();
        cache
            .put_all(vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "2".to_string()),
            ])
            .unwrap();
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_put_if_absent() {
        let cache = basic_cache();

        assert!(cache
            .put_if_absent("k".to_string(), "v1".to_string())
            .unwrap());
        assert!(!cache
            .put_if_absent("k".to_string(), "v2".to_string())
            .unwrap());
        assert_eq!(cache.get(&"k".to_string()).unwrap(), Some("v1".to_string()));
    }

    #[test]
    fn test_remove() {
        let cache = basic_cache();
        cache.put("k".to_string(), "v".to_string()).unwrap();

        assert!(cache.remove(&"k".to_string()).unwrap());
        assert!(!cache.remove(&"k".to_string()).unwrap());
        assert_eq!(cache.get(&"k".to_string()).unwrap(), None);
    }

    #[test]
    fn test_remove_if_equals() {
        let cache = basic_cache();
        cache.put("k".to_string(), "v".to_string()).unwrap();

        assert!(!cache
            .remove_if_equals(&"k".to_string(), &"other".to_string())
            .unwrap());
        assert!(cache.contains_key(&"k".to_string()).unwrap());
        assert!(cache
            .remove_if_equals(&"k".to_string(), &"v".to_string())
            .unwrap());
        assert!(!cache.contains_key(&"k".to_string()).unwrap());
    }

    #[test]
    fn test_get_and_remove() {
        let cache = basic_cache();
        cache.put("k".to_string(), "v".to_string()).unwrap();

        assert_eq!(
            cache.get_and_remove(&"k".to_string()).unwrap(),
            Some("v".to_string())
        );
        assert_eq!(cache.get_and_remove(&"k".to_string()).unwrap(), None);
    }

    #[test]
    fn test_replace_requires_presence() {
        let cache = basic_cache();

        assert!(!cache.replace(&"k".to_string(), "v".to_string()).unwrap());
        cache.put("k".to_string(), "v1".to_string()).unwrap();
        assert!(cache.replace(&"k".to_string(), "v2".to_string()).unwrap());
        assert_eq!(cache.get(&"k".to_string()).unwrap(), Some("v2".to_string()));
    }

    #[test]
    fn test_replace_if_equals() {
        let cache = basic_cache();
        cache.put("k".to_string(), "v1".to_string()).unwrap();

        assert!(!cache
            .replace_if_equals(&"k".to_string(), &"wrong".to_string(), "v2".to_string())
            .unwrap());
        assert!(cache
            .replace_if_equals(&"k".to_string(), &"v1".to_string(), "v2".to_string())
            .unwrap());
        assert_eq!(cache.get(&"k".to_string()).unwrap(), Some("v2".to_string()));
    }

    #[test]
    fn test_get_and_replace() {
        let cache = basic_cache();

        assert_eq!(
            cache
                .get_and_replace(&"k".to_string(), "v1".to_string())
                .unwrap(),
            None
        );
        cache.put("k".to_string(), "v1".to_string()).unwrap();
        assert_eq!(
            cache
                .get_and_replace(&"k".to_string(), "v2".to_string())
                .unwrap(),
            Some("v1".to_string())
        );
    }

    #[test]
    fn test_remove_all_and_clear() {
        let cache = basic_cache();
        cache.put("a".to_string(), "1".to_string()).unwrap();
        cache.put("b".to_string(), "2".to_string()).unwrap();

        cache.remove_all().unwrap();
        assert!(cache.is_empty());

        cache.put("c".to_string(), "3".to_string()).unwrap();
        cache.clear().unwrap();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_entries_snapshot() {
        let cache = basic_cache();
        cache.put("a".to_string(), "1".to_string()).unwrap();

        let entries = cache.entries().unwrap();
        assert_eq!(entries, vec![("a".to_string(), "1".to_string())]);
    }

    // == The Eternal-policy scenario ==

    #[test]
    fn test_eternal_scenario() {
        let cache: Cache<u64, String> = Cache::builder("scenario").build().unwrap();

        cache.put(1, "a".to_string()).unwrap();
        cache.put(1, "b".to_string()).unwrap();
        assert_eq!(cache.get(&1).unwrap(), Some("b".to_string()));
        assert_eq!(
            cache.get_and_put(1, "c".to_string()).unwrap(),
            Some("b".to_string())
        );
        assert_eq!(cache.get(&1).unwrap(), Some("c".to_string()));
        assert!(cache.remove(&1).unwrap());
        assert_eq!(cache.get(&1).unwrap(), None);
        assert!(!cache.remove(&1).unwrap());
    }

    // == Expiry ==

    #[test]
    fn test_created_policy_eviction() {
        let (cache, clock) =
            cache_with_clock(ExpiryPolicy::Created(Duration::from_secs(10)));

        cache.put("k".to_string(), "v".to_string()).unwrap();
        clock.advance(Duration::from_secs(11));

        assert_eq!(cache.get(&"k".to_string()).unwrap(), None);
        assert!(!cache.contains_key(&"k".to_string()).unwrap());
        assert_eq!(cache.stats().unwrap().evictions, 1);
    }

    #[test]
    fn test_touched_policy_resets_on_access() {
        let (cache, clock) =
            cache_with_clock(ExpiryPolicy::Touched(Duration::from_secs(10)));

        cache.put("k".to_string(), "v".to_string()).unwrap();

        // Read just before expiry resets the window
        clock.advance(Duration::from_secs(9));
        assert_eq!(cache.get(&"k".to_string()).unwrap(), Some("v".to_string()));

        clock.advance(Duration::from_secs(9));
        assert_eq!(cache.get(&"k".to_string()).unwrap(), Some("v".to_string()));

        // Without another touch the window finally closes
        clock.advance(Duration::from_secs(11));
        assert_eq!(cache.get(&"k".to_string()).unwrap(), None);
    }

    #[test]
    fn test_accessed_policy_waits_for_first_read() {
        let (cache, clock) =
            cache_with_clock(ExpiryPolicy::Accessed(Duration::from_secs(1)));

        cache.put("k".to_string(), "v".to_string()).unwrap();
        clock.advance(Duration::from_secs(100));

        // Never read, so the access window never opened
        assert!(cache.contains_key(&"k".to_string()).unwrap());
        assert_eq!(cache.get(&"k".to_string()).unwrap(), Some("v".to_string()));

        clock.advance(Duration::from_secs(2));
        assert_eq!(cache.get(&"k".to_string()).unwrap(), None);
    }

    #[test]
    fn test_update_refreshes_modified_window() {
        let (cache, clock) =
            cache_with_clock(ExpiryPolicy::Modified(Duration::from_secs(10)));

        cache.put("k".to_string(), "v1".to_string()).unwrap();
        clock.advance(Duration::from_secs(8));
        cache.put("k".to_string(), "v2".to_string()).unwrap();

        clock.advance(Duration::from_secs(8));
        assert_eq!(cache.get(&"k".to_string()).unwrap(), Some("v2".to_string()));

        clock.advance(Duration::from_secs(3));
        assert_eq!(cache.get(&"k".to_string()).unwrap(), None);
    }

    // == Statistics ==

    #[test]
    fn test_statistics_accuracy() {
        let cache = basic_cache();

        for i in 0..5 {
            cache.put(format!("k{i}"), "v".to_string()).unwrap();
        }
        for i in 0..5 {
            cache.get(&format!("k{i}")).unwrap();
        }
        for i in 10..13 {
            cache.get(&format!("k{i}")).unwrap();
        }
        cache.remove(&"k0".to_string()).unwrap();

        let stats = cache.stats().unwrap();
        assert_eq!(stats.puts, 5);
        assert_eq!(stats.hits, 5);
        assert_eq!(stats.misses, 3);
        // 5 puts each count a get, plus 8 explicit gets
        assert_eq!(stats.gets, 13);
        assert_eq!(stats.removals, 1);
        assert_eq!(stats.evictions, 0);
    }

    #[test]
    fn test_statistics_disabled() {
        let cache: Cache<String, String> = Cache::builder("nostats").build().unwrap();
        cache.put("k".to_string(), "v".to_string()).unwrap();
        assert!(cache.stats().is_none());
    }

    #[test]
    fn test_stats_clear() {
        let cache = basic_cache();
        cache.put("k".to_string(), "v".to_string()).unwrap();

        cache.stats_clear();
        assert_eq!(cache.stats().unwrap().puts, 0);
    }

    // == Read-through / Write-through ==

    fn loaded_cache() -> Cache<String, String> {
        let mut values = HashMap::new();
        values.insert("db-key".to_string(), "db-value".to_string());
        Cache::builder("rt")
            .config(
                CacheConfig::new()
                    .with_read_through(true)
                    .with_statistics(true),
            )
            .loader(MapLoader { values })
            .build()
            .unwrap()
    }

    #[test]
    fn test_read_through_populates_on_miss() {
        let cache = loaded_cache();

        assert_eq!(
            cache.get(&"db-key".to_string()).unwrap(),
            Some("db-value".to_string())
        );
        // Second get is a plain hit, no second load
        assert_eq!(
            cache.get(&"db-key".to_string()).unwrap(),
            Some("db-value".to_string())
        );

        let stats = cache.stats().unwrap();
        assert_eq!(stats.read_throughs, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
    }

    #[test]
    fn test_read_through_miss_leaves_no_entry() {
        let cache = loaded_cache();

        assert_eq!(cache.get(&"unknown".to_string()).unwrap(), None);
        assert!(!cache.contains_key(&"unknown".to_string()).unwrap());
    }

    #[test]
    fn test_loader_failure_propagates() {
        let cache = Cache::builder("rt-fail")
            .config(CacheConfig::new().with_read_through(true))
            .loader(FailingLoader)
            .build()
            .unwrap();

        let err = cache.get(&"k".to_string()).unwrap_err();
        assert!(matches!(err, CacheError::Loader(_)));
    }

    #[test]
    fn test_loader_ignored_without_read_through() {
        let mut values = HashMap::new();
        values.insert("k".to_string(), "loaded".to_string());
        let cache = Cache::builder("no-rt")
            .loader(MapLoader { values })
            .build()
            .unwrap();

        assert_eq!(cache.get(&"k".to_string()).unwrap(), None);
    }

    fn written_cache(write_through: bool) -> (Cache<String, String>, Arc<RecordingWriter>) {
        let writer = Arc::new(RecordingWriter::default());
        let cache = Cache::builder("wt")
            .config(
                CacheConfig::new()
                    .with_write_through(write_through)
                    .with_statistics(true),
            )
            .writer(writer.clone())
            .build()
            .unwrap();
        (cache, writer)
    }

    #[test]
    fn test_write_through_fidelity() {
        let (cache, writer) = written_cache(true);

        cache.put("k".to_string(), "v".to_string()).unwrap();
        assert_eq!(
            writer.writes.lock().as_slice(),
            &[("k".to_string(), "v".to_string())]
        );

        cache.remove(&"k".to_string()).unwrap();
        assert_eq!(writer.deletes.lock().as_slice(), &["k".to_string()]);

        let stats = cache.stats().unwrap();
        assert_eq!(stats.write_throughs, 1);
        assert_eq!(stats.remove_throughs, 1);
    }

    #[test]
    fn test_write_through_disabled_no_propagation() {
        let (cache, writer) = written_cache(false);

        cache.put("k".to_string(), "v".to_string()).unwrap();
        cache.remove(&"k".to_string()).unwrap();

        assert!(writer.writes.lock().is_empty());
        assert!(writer.deletes.lock().is_empty());
    }

    #[test]
    fn test_remove_all_goes_through_writer_clear_does_not() {
        let (cache, writer) = written_cache(true);

        cache.put("a".to_string(), "1".to_string()).unwrap();
        cache.put("b".to_string(), "2".to_string()).unwrap();
        cache.remove_all().unwrap();
        assert_eq!(writer.deletes.lock().len(), 2);

        cache.put("c".to_string(), "3".to_string()).unwrap();
        cache.clear().unwrap();
        // clear bypasses write-through
        assert_eq!(writer.deletes.lock().len(), 2);
    }

    // == Store-by-value ==

    #[test]
    fn test_store_by_value_copy_failure_surfaces() {
        struct BrokenCopier;
        impl ValueCopier<String> for BrokenCopier {
            fn deep_copy(&self, _value: &String) -> Result<String> {
                Err(CacheError::CopyFailed("not serializable".to_string()))
            }
        }

        let cache = Cache::builder("sbv")
            .config(CacheConfig::new().with_store_by_value(true))
            .copier(BrokenCopier)
            .build()
            .unwrap();

        let err = cache.put("k".to_string(), "v".to_string()).unwrap_err();
        assert!(matches!(err, CacheError::CopyFailed(_)));
        assert!(!cache.contains_key(&"k".to_string()).unwrap());
    }

    #[test]
    fn test_store_by_value_default_copier() {
        let cache: Cache<String, String> = Cache::builder("sbv-default")
            .config(CacheConfig::new().with_store_by_value(true))
            .build()
            .unwrap();

        cache.put("k".to_string(), "v".to_string()).unwrap();
        assert_eq!(cache.get(&"k".to_string()).unwrap(), Some("v".to_string()));
    }

    // == Events ==

    fn capture_events(
        cache: &Cache<String, String>,
        name: &str,
        kind: EventKind,
    ) -> Arc<Mutex<Vec<crate::cache::events::EventRecord<String, String>>>> {
        let records = Arc::new(Mutex::new(Vec::new()));
        let sink = records.clone();
        cache
            .register_listener(ListenerConfig::new(name, kind, move |batch: &[_]| {
                sink.lock().extend(batch.to_vec());
            }))
            .unwrap();
        records
    }

    #[test]
    fn test_created_and_updated_events() {
        let cache = basic_cache();
        let created = capture_events(&cache, "created", EventKind::Created);
        let updated = capture_events(&cache, "updated", EventKind::Updated);

        cache.put("k".to_string(), "v1".to_string()).unwrap();
        cache.put("k".to_string(), "v2".to_string()).unwrap();
        cache.flush_events();

        let created = created.lock();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].value, Some("v1".to_string()));
        assert_eq!(created[0].old_value, None);

        let updated = updated.lock();
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0].value, Some("v2".to_string()));
        assert_eq!(updated[0].old_value, Some("v1".to_string()));
    }

    #[test]
    fn test_removed_and_expired_events() {
        let (cache, clock) =
            cache_with_clock(ExpiryPolicy::Created(Duration::from_secs(1)));
        let removed = capture_events(&cache, "removed", EventKind::Removed);
        let expired = capture_events(&cache, "expired", EventKind::Expired);

        cache.put("gone".to_string(), "v".to_string()).unwrap();
        cache.remove(&"gone".to_string()).unwrap();

        cache.put("stale".to_string(), "v".to_string()).unwrap();
        clock.advance(Duration::from_secs(2));
        cache.get(&"stale".to_string()).unwrap();
        cache.flush_events();

        assert_eq!(removed.lock().len(), 1);
        assert_eq!(removed.lock()[0].old_value, Some("v".to_string()));
        assert_eq!(expired.lock().len(), 1);
        assert_eq!(expired.lock()[0].key, "stale");
    }

    #[test]
    fn test_duplicate_listener_rejected() {
        let cache = basic_cache();
        let _ = capture_events(&cache, "dup", EventKind::Created);

        let err = cache
            .register_listener(ListenerConfig::new(
                "dup",
                EventKind::Removed,
                |_: &[_]| {},
            ))
            .unwrap_err();
        assert!(matches!(err, CacheError::InvalidArgument(_)));
    }

    // == Invoke ==

    #[test]
    fn test_invoke_mutable_entry() {
        let cache = basic_cache();
        cache.put("k".to_string(), "v1".to_string()).unwrap();

        let previous = cache
            .invoke("k".to_string(), |entry| {
                assert!(entry.exists()?);
                let old = entry.value()?;
                entry.set_value("v2".to_string())?;
                Ok(old)
            })
            .unwrap();

        assert_eq!(previous, Some("v1".to_string()));
        assert_eq!(cache.get(&"k".to_string()).unwrap(), Some("v2".to_string()));
    }

    #[test]
    fn test_invoke_remove_through_entry() {
        let cache = basic_cache();
        cache.put("k".to_string(), "v".to_string()).unwrap();

        cache
            .invoke("k".to_string(), |entry| entry.remove())
            .unwrap();

        assert!(!cache.contains_key(&"k".to_string()).unwrap());
    }

    #[test]
    fn test_invoke_all_omits_absent_keys() {
        let cache = basic_cache();
        cache.put("a".to_string(), "1".to_string()).unwrap();
        cache.put("b".to_string(), "2".to_string()).unwrap();

        let results = cache
            .invoke_all(
                vec!["a".to_string(), "b".to_string(), "missing".to_string()],
                |entry| entry.value(),
            )
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results["a"], Some("1".to_string()));
        assert!(!results.contains_key("missing"));
    }

    // == Lifecycle ==

    #[test]
    fn test_close_is_idempotent() {
        let cache = basic_cache();
        cache.put("k".to_string(), "v".to_string()).unwrap();

        assert!(!cache.is_closed());
        cache.close();
        assert!(cache.is_closed());
        cache.close();
        assert!(cache.is_closed());

        assert!(matches!(
            cache.get(&"k".to_string()),
            Err(CacheError::Closed(_))
        ));
        assert!(matches!(
            cache.put("k".to_string(), "v".to_string()),
            Err(CacheError::Closed(_))
        ));
        assert!(matches!(
            cache.contains_key(&"k".to_string()),
            Err(CacheError::Closed(_))
        ));
    }

    #[test]
    fn test_close_notifies_manager() {
        #[derive(Default)]
        struct RecordingManager {
            released: Mutex<Vec<String>>,
        }
        impl ManagerHandle for RecordingManager {
            fn is_closed(&self) -> bool {
                false
            }
            fn release(&self, name: &str) {
                self.released.lock().push(name.to_string());
            }
        }

        let manager = Arc::new(RecordingManager::default());
        let cache: Cache<String, String> = Cache::builder("managed")
            .manager(manager.clone())
            .build()
            .unwrap();

        cache.close();
        cache.close();

        // Exactly one release despite the double close
        assert_eq!(manager.released.lock().as_slice(), &["managed".to_string()]);
    }

    #[test]
    fn test_closed_manager_not_notified() {
        struct ClosedManager;
        impl ManagerHandle for ClosedManager {
            fn is_closed(&self) -> bool {
                true
            }
            fn release(&self, _name: &str) {
                panic!("closed manager must not be notified");
            }
        }

        let cache: Cache<String, String> = Cache::builder("orphan")
            .manager(Arc::new(ClosedManager))
            .build()
            .unwrap();
        cache.close();
    }

    #[test]
    fn test_close_drops_pending_events() {
        let cache = basic_cache();
        let created = capture_events(&cache, "created", EventKind::Created);

        cache.put("k".to_string(), "v".to_string()).unwrap();
        cache.close();
        cache.flush_events();

        assert!(created.lock().is_empty());
    }

    #[test]
    fn test_introspection_survives_close() {
        let cache = basic_cache();
        cache.close();

        assert_eq!(cache.name(), "test");
        assert!(cache.is_closed());
        assert!(cache.is_empty());
        assert!(!cache.config().read_through);
    }

    // == Load All ==

    #[tokio::test]
    async fn test_load_all_completes_async() {
        let cache = loaded_cache();
        let (tx, rx) = tokio::sync::oneshot::channel();

        cache
            .load_all(vec!["db-key".to_string()], false, move |outcome| {
                tx.send(outcome.is_ok()).ok();
            })
            .unwrap();

        assert!(rx.await.unwrap());
        assert!(cache.contains_key(&"db-key".to_string()).unwrap());
    }

    #[tokio::test]
    async fn test_load_all_replace_existing_evicts_first() {
        let cache = loaded_cache();
        cache
            .put("db-key".to_string(), "stale".to_string())
            .unwrap();

        let (tx, rx) = tokio::sync::oneshot::channel();
        cache
            .load_all(vec!["db-key".to_string()], true, move |outcome| {
                tx.send(outcome.is_ok()).ok();
            })
            .unwrap();
        rx.await.unwrap();

        assert_eq!(
            cache.get(&"db-key".to_string()).unwrap(),
            Some("db-value".to_string())
        );
    }

    #[tokio::test]
    async fn test_load_all_failure_reported_via_callback() {
        let cache = Cache::builder("la-fail")
            .config(CacheConfig::new().with_read_through(true))
            .loader(FailingLoader)
            .build()
            .unwrap();

        let (tx, rx) = tokio::sync::oneshot::channel();
        cache
            .load_all(vec!["k".to_string()], false, move |outcome| {
                tx.send(outcome).ok();
            })
            .unwrap();

        let outcome = rx.await.unwrap();
        assert!(matches!(outcome, Err(CacheError::Loader(_))));
    }
}
