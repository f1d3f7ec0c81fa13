//! Result cache
//!
//! Concurrent TTL-bound cache for pipeline results, keyed by a stable hash
//! of (normalized query, k, canonical filter set, language). Expired
//! entries are swept on every insert; when the cardinality cap is reached,
//! the oldest entry is evicted.

use dashmap::DashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};

use ragpipe_core::{SearchFilters, SearchResult};

#[derive(Clone)]
struct CacheEntry {
    results: Vec<SearchResult>,
    inserted_at: Instant,
}

/// Concurrent TTL result cache
pub struct ResultCache {
    entries: DashMap<u64, CacheEntry>,
    ttl: Duration,
    max_entries: usize,
}

impl ResultCache {
    /// Create a cache with the given TTL and cardinality cap.
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    /// Compute the stable key for a query.
    ///
    /// The query is lowercased and trimmed; filters serialize canonically
    /// because [`SearchFilters`] is an ordered map.
    pub fn key(query: &str, k: usize, filters: Option<&SearchFilters>, language: &str) -> u64 {
        let filters_json = filters
            .map(|f| serde_json::to_string(f).unwrap_or_default())
            .unwrap_or_default();

        let mut hasher = DefaultHasher::new();
        query.trim().to_lowercase().hash(&mut hasher);
        k.hash(&mut hasher);
        filters_json.hash(&mut hasher);
        language.hash(&mut hasher);
        hasher.finish()
    }

    /// Look up results, evicting the entry if it expired.
    pub fn get(&self, key: u64) -> Option<Vec<SearchResult>> {
        let expired = match self.entries.get(&key) {
            Some(entry) => {
                if entry.inserted_at.elapsed() < self.ttl {
                    return Some(entry.results.clone());
                }
                true
            },
            None => return None,
        };

        if expired {
            self.entries.remove(&key);
        }
        None
    }

    /// Insert results. Cached values are immutable; re-inserting a key
    /// replaces the entry wholesale.
    pub fn insert(&self, key: u64, results: Vec<SearchResult>) {
        self.sweep();

        if self.entries.len() >= self.max_entries && !self.entries.contains_key(&key) {
            self.evict_oldest();
        }

        self.entries.insert(
            key,
            CacheEntry {
                results,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Remove entries whose age reached the TTL.
    pub fn sweep(&self) {
        let ttl = self.ttl;
        self.entries.retain(|_, entry| entry.inserted_at.elapsed() < ttl);
    }

    fn evict_oldest(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.value().inserted_at)
            .map(|entry| *entry.key());

        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop all entries
    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn results(n: usize) -> Vec<SearchResult> {
        (0..n)
            .map(|i| SearchResult::new(format!("chunk-{i}"), format!("text {i}"), 1.0 - i as f32 * 0.1))
            .collect()
    }

    #[test]
    fn test_round_trip() {
        let cache = ResultCache::new(Duration::from_secs(60), 10);
        let key = ResultCache::key("Car Price Istanbul ", 5, None, "en");

        cache.insert(key, results(3));
        let cached = cache.get(key).unwrap();
        assert_eq!(cached.len(), 3);
        assert_eq!(cached[0].id, "chunk-0");
    }

    #[test]
    fn test_key_normalizes_query() {
        let a = ResultCache::key("  Car Price  ", 5, None, "en");
        let b = ResultCache::key("car price", 5, None, "en");
        assert_eq!(a, b);

        // k and language are part of the key
        assert_ne!(a, ResultCache::key("car price", 10, None, "en"));
        assert_ne!(a, ResultCache::key("car price", 5, None, "tr"));
    }

    #[test]
    fn test_key_includes_filters() {
        let mut filters = BTreeMap::new();
        filters.insert("language".to_string(), serde_json::json!("en"));

        let without = ResultCache::key("q", 5, None, "en");
        let with = ResultCache::key("q", 5, Some(&filters), "en");
        assert_ne!(without, with);
    }

    #[test]
    fn test_expiry() {
        let cache = ResultCache::new(Duration::from_millis(0), 10);
        let key = ResultCache::key("q", 5, None, "en");
        cache.insert(key, results(1));

        assert!(cache.get(key).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_overflow_evicts_oldest() {
        let cache = ResultCache::new(Duration::from_secs(60), 2);

        let k1 = ResultCache::key("first", 5, None, "en");
        let k2 = ResultCache::key("second", 5, None, "en");
        let k3 = ResultCache::key("third", 5, None, "en");

        cache.insert(k1, results(1));
        std::thread::sleep(Duration::from_millis(5));
        cache.insert(k2, results(1));
        std::thread::sleep(Duration::from_millis(5));
        cache.insert(k3, results(1));

        assert_eq!(cache.len(), 2);
        assert!(cache.get(k1).is_none());
        assert!(cache.get(k2).is_some());
        assert!(cache.get(k3).is_some());
    }

    #[test]
    fn test_concurrent_access() {
        use std::sync::Arc;

        let cache = Arc::new(ResultCache::new(Duration::from_secs(60), 1000));
        let mut handles = Vec::new();

        for t in 0..8 {
            let cache = Arc::clone(&cache);
            handles.push(std::thread::spawn(move || {
                for i in 0..100 {
                    let key = ResultCache::key(&format!("q-{t}-{i}"), 5, None, "en");
                    cache.insert(key, results(2));
                    assert!(cache.get(key).is_some());
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.len(), 800);
    }
}
