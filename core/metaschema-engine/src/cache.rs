//! Small time-bounded caches for resolved table names and compiled lookups.
//!
//! Entries are served until their TTL lapses or they are invalidated. Writes
//! that change what an entry was derived from invalidate it explicitly, so the
//! TTL only bounds staleness from writers in other processes.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub size: usize,
}

struct Entry<V> {
    value: Arc<V>,
    inserted: Instant,
}

pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: Mutex<HashMap<K, Entry<V>>>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl<K: Eq + Hash + Clone, V> TtlCache<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    // A panic while holding the lock cannot leave an entry half-written, so
    // a poisoned map is still usable.
    fn entries(&self) -> MutexGuard<'_, HashMap<K, Entry<V>>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let mut entries = self.entries();
        let fresh = match entries.get(key) {
            Some(entry) if entry.inserted.elapsed() < self.ttl => Some(Arc::clone(&entry.value)),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        };
        let counter = if fresh.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        fresh
    }

    pub fn insert(&self, key: K, value: V) -> Arc<V> {
        let value = Arc::new(value);
        self.entries().insert(
            key,
            Entry {
                value: Arc::clone(&value),
                inserted: Instant::now(),
            },
        );
        value
    }

    pub fn invalidate(&self, key: &K) {
        self.entries().remove(key);
    }

    /// Drops every entry whose value matches `pred`.
    pub fn invalidate_where(&self, pred: impl Fn(&V) -> bool) {
        self.entries().retain(|_, entry| !pred(&entry.value));
    }

    pub fn clear(&self) {
        self.entries().clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            size: self.entries().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serves_until_invalidated() {
        let cache: TtlCache<u32, String> = TtlCache::new(Duration::from_secs(60));
        assert!(cache.get(&1).is_none());
        cache.insert(1, "fin_invoices".into());
        assert_eq!(cache.get(&1).as_deref().map(String::as_str), Some("fin_invoices"));
        cache.invalidate(&1);
        assert!(cache.get(&1).is_none());
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.size), (1, 2, 0));
    }

    #[test]
    fn zero_ttl_never_serves() {
        let cache: TtlCache<u32, u32> = TtlCache::new(Duration::ZERO);
        cache.insert(1, 1);
        assert!(cache.get(&1).is_none());
    }

    #[test]
    fn invalidate_where_matches_values() {
        let cache: TtlCache<u32, (u32, &str)> = TtlCache::new(Duration::from_secs(60));
        cache.insert(1, (7, "a"));
        cache.insert(2, (8, "b"));
        cache.invalidate_where(|(module, _)| *module == 7);
        assert!(cache.get(&1).is_none());
        assert!(cache.get(&2).is_some());
    }
}
