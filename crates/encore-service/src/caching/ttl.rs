use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

/// A value in the [`TtlCache`] together with the time it was stored.
#[derive(Clone, Debug)]
struct CacheEntry<T> {
    value: T,
    stored_at: Instant,
}

impl<T> CacheEntry<T> {
    fn is_fresh(&self, ttl: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) < ttl
    }
}

/// A keyed in-memory cache that serves a value only while it is younger than a fixed TTL.
///
/// Time is read from [`tokio::time::Instant`], so a paused tokio clock controls expiry in tests.
pub struct TtlCache<K, T> {
    name: &'static str,
    ttl: Duration,
    entries: Arc<Mutex<HashMap<K, CacheEntry<T>>>>,
}

impl<K, T> Clone for TtlCache<K, T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            ttl: self.ttl,
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<K, T> std::fmt::Debug for TtlCache<K, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self
            .entries
            .try_lock()
            .map(|e| e.len())
            .unwrap_or_default();
        f.debug_struct("TtlCache")
            .field("name", &self.name)
            .field("ttl", &self.ttl)
            .field("entries", &entries)
            .finish()
    }
}

impl<K: Eq + Hash, T: Clone> TtlCache<K, T> {
    pub fn new(name: &'static str, ttl: Duration) -> Self {
        Self {
            name,
            ttl,
            entries: Default::default(),
        }
    }

    /// Returns the stored value if it has not expired yet.
    ///
    /// An expired entry is removed as a side effect.
    pub fn get<Q>(&self, key: &Q) -> Option<T>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.get(key)?;
        if entry.is_fresh(self.ttl, now) {
            return Some(entry.value.clone());
        }

        entries.remove(key);
        tracing::trace!(cache = self.name, "Dropped expired cache entry");
        None
    }

    /// Stores `value`, replacing any previous entry and restarting its TTL.
    pub fn set(&self, key: K, value: T) {
        let entry = CacheEntry {
            value,
            stored_at: Instant::now(),
        };
        self.entries.lock().unwrap().insert(key, entry);
    }

    /// Removes the entry for `key`, returning whether one existed.
    pub fn invalidate<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.entries.lock().unwrap().remove(key).is_some()
    }

    pub fn invalidate_all(&self) {
        let entries = std::mem::take(&mut *self.entries.lock().unwrap());
        tracing::trace!(cache = self.name, count = entries.len(), "Invalidated cache");
    }

    /// The number of stored entries, including expired ones that were not looked up yet.
    pub fn entry_count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}
