use moka::sync::Cache;

/// The most recent successful value per key, kept past its TTL for fallback purposes.
///
/// Entries are bounded by count, not by age. Nothing in here is ever served as a fresh result.
#[derive(Clone)]
pub struct LastKnownGood<T> {
    cache: Cache<String, T>,
}

impl<T> std::fmt::Debug for LastKnownGood<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LastKnownGood")
            .field("name", &self.cache.name())
            .field("entries", &self.cache.entry_count())
            .finish()
    }
}

impl<T: Clone + Send + Sync + 'static> LastKnownGood<T> {
    pub fn new(name: &str, capacity: u64) -> Self {
        let cache = Cache::builder().name(name).max_capacity(capacity).build();
        Self { cache }
    }

    pub fn get(&self, key: &str) -> Option<T> {
        self.cache.get(key)
    }

    pub fn insert(&self, key: String, value: T) {
        self.cache.insert(key, value);
    }

    pub fn invalidate(&self, key: &str) {
        self.cache.invalidate(key);
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }
}
