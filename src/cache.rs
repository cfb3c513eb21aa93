use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::scrape::ScrapeResult;

struct CacheEntry {
    result: ScrapeResult,
    created_at: Instant,
}

/// In-process result store keyed by request URL. Entries expire after the
/// TTL; a whole-map clear is the only other eviction. Small map, so a single
/// lock is enough to serialize readers and writers.
pub struct ResultCache {
    ttl: Duration,
    inner: Mutex<HashMap<String, CacheEntry>>,
}

impl ResultCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &str) -> Option<ScrapeResult> {
        self.get_at(key, Instant::now())
    }

    fn get_at(&self, key: &str, now: Instant) -> Option<ScrapeResult> {
        let mut map = self.inner.lock().unwrap();
        match map.get(key) {
            Some(entry) if now.duration_since(entry.created_at) < self.ttl => {
                Some(entry.result.clone())
            }
            Some(_) => {
                map.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, key: &str, result: ScrapeResult) {
        self.put_at(key, result, Instant::now());
    }

    fn put_at(&self, key: &str, result: ScrapeResult, now: Instant) {
        let mut map = self.inner.lock().unwrap();
        map.insert(
            key.to_string(),
            CacheEntry {
                result,
                created_at: now,
            },
        );
    }

    /// Evicts everything, returning how many entries were dropped.
    pub fn clear(&self) -> usize {
        let mut map = self.inner.lock().unwrap();
        let count = map.len();
        map.clear();
        count
    }

    /// Number of live entries. Expired ones awaiting lazy eviction are not
    /// counted.
    pub fn len(&self) -> usize {
        self.len_at(Instant::now())
    }

    fn len_at(&self, now: Instant) -> usize {
        self.inner
            .lock()
            .unwrap()
            .values()
            .filter(|e| now.duration_since(e.created_at) < self.ttl)
            .count()
    }
}
