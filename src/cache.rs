//! Optional in-memory cache of decoded values for hot lookups.

use crate::index;
use crate::value::Value;
use lru::LruCache;
use std::num::NonZeroUsize;

/// LRU of decoded values keyed like the index. A hit skips the seek,
/// decompress and decode path entirely.
#[derive(Debug)]
pub struct ReadCache {
    inner: LruCache<String, CachedValue>,
}

#[derive(Debug)]
struct CachedValue {
    value: Value,
    expires: u32,
}

impl ReadCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            inner: LruCache::new(capacity),
        }
    }

    /// Returns the cached value if present and still live at `now`; an
    /// expired entry is evicted on observation.
    pub fn get(&mut self, key: &str, now: u32) -> Option<Value> {
        let stale = match self.inner.get(key) {
            Some(cached) if index::expired(cached.expires, now) => true,
            Some(cached) => return Some(cached.value.clone()),
            None => false,
        };
        if stale {
            self.inner.pop(key);
        }
        None
    }

    pub fn put(&mut self, key: String, value: Value, expires: u32) {
        self.inner.put(key, CachedValue { value, expires });
    }

    pub fn remove(&mut self, key: &str) {
        self.inner.pop(key);
    }
}
