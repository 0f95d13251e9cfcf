//! Typed key/value cache with readiness and staleness tracking.
//!
//! Each cache owns its own lock, so writers of one data source never contend
//! with readers of another. Reads hand out owned copies; nothing borrowed from
//! inside the lock escapes it.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tokio::time::Instant;

use crate::error::CacheError;

/// Independent copy of a cache's contents.
#[derive(Debug, Clone)]
pub struct CacheSnapshot<K, V> {
    pub items: HashMap<K, V>,
    /// When the cache was last replaced or upserted.
    pub last_updated: Instant,
}

impl<K: Eq + Hash, V: PartialEq> PartialEq for CacheSnapshot<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.last_updated == other.last_updated && self.items == other.items
    }
}

#[derive(Debug)]
struct Inner<K, V> {
    items: HashMap<K, V>,
    last_updated: Option<Instant>,
}

/// Keyed store stamped on every replace or upsert.
///
/// `last_updated == None` means "not ready": the cache has not been populated
/// since creation or the last [`TypedCache::reset`]. With a `max_age`, a
/// populated cache whose stamp is older than that is stale.
#[derive(Debug)]
pub struct TypedCache<K, V> {
    inner: RwLock<Inner<K, V>>,
    max_age: Option<Duration>,
}

impl<K, V> TypedCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(max_age: Option<Duration>) -> Self {
        Self {
            inner: RwLock::new(Inner {
                items: HashMap::new(),
                last_updated: None,
            }),
            max_age,
        }
    }

    pub fn max_age(&self) -> Option<Duration> {
        self.max_age
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner<K, V>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner<K, V>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Swap the entire contents in one step.
    pub fn replace(&self, fresh: HashMap<K, V>) {
        let mut inner = self.write();
        inner.items = fresh;
        inner.last_updated = Some(Instant::now());
    }

    /// Upsert one entry.
    pub fn update(&self, key: K, value: V) {
        let mut inner = self.write();
        inner.items.insert(key, value);
        inner.last_updated = Some(Instant::now());
    }

    /// Remove one entry. Does not touch the stamp.
    pub fn delete(&self, key: &K) -> bool {
        self.write().items.remove(key).is_some()
    }

    /// Empty the cache and mark it not ready.
    pub fn reset(&self) {
        let mut inner = self.write();
        inner.items.clear();
        inner.last_updated = None;
    }

    /// Look up one entry. Misses when absent, never populated, or stale.
    pub fn get(&self, key: &K) -> Option<V> {
        let inner = self.read();
        self.check(&inner).ok()?;
        inner.items.get(key).cloned()
    }

    /// Like [`get`](Self::get), but says why the cache could not answer.
    pub fn lookup(&self, key: &K) -> Result<Option<V>, CacheError> {
        let inner = self.read();
        self.check(&inner)?;
        Ok(inner.items.get(key).cloned())
    }

    /// Copy out every entry with the stamp they were read at.
    pub fn get_all(&self) -> Result<CacheSnapshot<K, V>, CacheError> {
        let inner = self.read();
        let last_updated = self.check(&inner)?;
        Ok(CacheSnapshot {
            items: inner.items.clone(),
            last_updated,
        })
    }

    fn check(&self, inner: &Inner<K, V>) -> Result<Instant, CacheError> {
        let last_updated = inner.last_updated.ok_or(CacheError::NotReady)?;
        if let Some(max_age) = self.max_age {
            let age = last_updated.elapsed();
            if age > max_age {
                return Err(CacheError::Stale { age, max_age });
            }
        }
        Ok(last_updated)
    }

    pub fn last_updated(&self) -> Option<Instant> {
        self.read().last_updated
    }

    /// Time since the last stamp, `None` when not ready.
    pub fn age(&self) -> Option<Duration> {
        self.last_updated().map(|stamp| stamp.elapsed())
    }

    /// Populated at least once since the last reset.
    pub fn is_ready(&self) -> bool {
        self.last_updated().is_some()
    }

    /// Ready and within `max_age`.
    pub fn is_fresh(&self) -> bool {
        let inner = self.read();
        self.check(&inner).is_ok()
    }

    pub fn len(&self) -> usize {
        self.read().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V> Default for TypedCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new(None)
    }
}
