//! External Integration Module
//!
//! Traits for the collaborators a cache can be wired to: an external store
//! loader (read-through), writer (write-through), a value copier for
//! store-by-value isolation, and the owning manager's close hook. The engine
//! consumes these as injected capabilities and never implements the backing
//! store itself.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{CacheError, Result};

// == Cache Loader ==
/// Read-through source of truth.
///
/// `load` returning `Ok(None)` means the external store has no value for the
/// key; the cache records a miss without populating.
pub trait CacheLoader<K, V>: Send + Sync {
    /// Loads a single value.
    fn load(&self, key: &K) -> Result<Option<V>>;

    /// Loads a batch of values. Keys absent from the result are treated as
    /// missing in the external store.
    fn load_all(&self, keys: &[K]) -> Result<HashMap<K, V>>
    where
        K: Clone + Eq + std::hash::Hash,
    {
        let mut out = HashMap::new();
        for key in keys {
            if let Some(value) = self.load(key)? {
                out.insert(key.clone(), value);
            }
        }
        Ok(out)
    }
}

// == Cache Writer ==
/// Write-through sink for mutations.
pub trait CacheWriter<K, V>: Send + Sync {
    /// Propagates a single write.
    fn write(&self, key: &K, value: &V) -> Result<()>;

    /// Propagates a batch of writes.
    fn write_all(&self, entries: &[(K, V)]) -> Result<()> {
        for (key, value) in entries {
            self.write(key, value)?;
        }
        Ok(())
    }

    /// Propagates a single delete.
    fn delete(&self, key: &K) -> Result<()>;

    /// Propagates a batch of deletes.
    fn delete_all(&self, keys: &[K]) -> Result<()> {
        for key in keys {
            self.delete(key)?;
        }
        Ok(())
    }
}

// == Value Copier ==
/// Deep-copy capability used when store-by-value isolation is enabled.
///
/// A copy failure is a configuration error: it is surfaced to the caller as
/// `CopyFailed` and never retried.
pub trait ValueCopier<V>: Send + Sync {
    /// Produces an isolated copy of `value`.
    fn deep_copy(&self, value: &V) -> Result<V>;
}

// == Cloning Copier ==
/// Copier backed by plain `Clone`. The default when store-by-value is enabled
/// and no copier is injected.
#[derive(Debug, Default, Clone, Copy)]
pub struct CloningCopier;

impl<V: Clone> ValueCopier<V> for CloningCopier {
    fn deep_copy(&self, value: &V) -> Result<V> {
        Ok(value.clone())
    }
}

// == Serde Copier ==
/// Copier that round-trips the value through serde_json, guaranteeing a copy
/// with no shared internal references.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerdeCopier;

impl<V: Serialize + DeserializeOwned> ValueCopier<V> for SerdeCopier {
    fn deep_copy(&self, value: &V) -> Result<V> {
        let raw = serde_json::to_vec(value).map_err(|e| CacheError::CopyFailed(e.to_string()))?;
        serde_json::from_slice(&raw).map_err(|e| CacheError::CopyFailed(e.to_string()))
    }
}

// == Manager Handle ==
/// Back-reference to the manager that owns this cache's name registration.
///
/// The engine notifies the manager on `close()` so the name can be released;
/// a manager that is itself closed is not notified.
pub trait ManagerHandle: Send + Sync {
    /// Whether the owning manager has been closed.
    fn is_closed(&self) -> bool;

    /// Drops the named cache from the manager's registry.
    fn release(&self, name: &str);
}
