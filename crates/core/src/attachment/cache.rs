//! Process-local, size-bounded content cache keyed by
//! `(canonical_path, mtime_ns, size)` (spec §4.2 "Lazy loading", §5 "Shared
//! resources" — single lock held only across get/insert/evict for a key).

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use lru::LruCache;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    path: PathBuf,
    mtime_ns: i128,
    size: u64,
}

pub struct ContentCache {
    inner: Mutex<LruCache<CacheKey, Arc<str>>>,
}

impl ContentCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = std::num::NonZeroUsize::new(capacity.max(1)).unwrap();
        Self { inner: Mutex::new(LruCache::new(capacity)) }
    }

    pub fn get_or_insert_with(
        &self,
        path: &std::path::Path,
        mtime_ns: i128,
        size: u64,
        load: impl FnOnce() -> std::io::Result<String>,
    ) -> std::io::Result<Arc<str>> {
        let key = CacheKey { path: path.to_path_buf(), mtime_ns, size };

        let mut guard = self.inner.lock().expect("content cache poisoned");
        if let Some(hit) = guard.get(&key) {
            return Ok(Arc::clone(hit));
        }
        drop(guard);

        let loaded: Arc<str> = Arc::from(load()?.into_boxed_str());

        let mut guard = self.inner.lock().expect("content cache poisoned");
        guard.put(key, Arc::clone(&loaded));
        Ok(loaded)
    }
}

impl Default for ContentCache {
    fn default() -> Self {
        // Default capacity mirrors the teacher's unbounded DashMap stub
        // cache in spirit but obeys the spec's "size-bounded, LRU eviction"
        // requirement.
        Self::new(512)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caches_by_key_and_evicts_lru() {
        let cache = ContentCache::new(1);
        let a = cache
            .get_or_insert_with(std::path::Path::new("/a"), 0, 1, || Ok("a".to_string()))
            .unwrap();
        assert_eq!(&*a, "a");

        let mut calls = 0;
        let a_again = cache
            .get_or_insert_with(std::path::Path::new("/a"), 0, 1, || {
                calls += 1;
                Ok("a-reloaded".to_string())
            })
            .unwrap();
        assert_eq!(&*a_again, "a");
        assert_eq!(calls, 0);

        // Inserting a second key evicts the first (capacity 1).
        let _b = cache
            .get_or_insert_with(std::path::Path::new("/b"), 0, 1, || Ok("b".to_string()))
            .unwrap();
        let mut reload_calls = 0;
        let _a_third = cache
            .get_or_insert_with(std::path::Path::new("/a"), 0, 1, || {
                reload_calls += 1;
                Ok("a-reloaded-again".to_string())
            })
            .unwrap();
        assert_eq!(reload_calls, 1);
    }
}
