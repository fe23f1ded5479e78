//! In-memory LRU translation cache (tier 1).
//! Process-lifetime only; pure acceleration over the persistent tier and the
//! remote record store.

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;
use serde_json::Value;

use crate::key::KEY_PREFIX;

pub struct MemoryCache {
    inner: Mutex<LruCache<String, Value>>,
}

impl MemoryCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.lock().get(key).cloned()
    }

    pub fn insert(&self, key: String, value: Value) {
        self.inner.lock().put(key, value);
    }

    pub fn remove(&self, key: &str) {
        self.inner.lock().pop(key);
    }

    /// Drop all entries under the subsystem prefix, optionally scoped to one
    /// target language (keys are `i18n:v3:<ns>:<lang>:<suffix>`).
    pub fn clear(&self, target_language: Option<&str>) {
        let mut cache = self.inner.lock();
        let doomed: Vec<String> = cache
            .iter()
            .filter(|(k, _)| {
                k.starts_with(KEY_PREFIX)
                    && target_language.map_or(true, |lang| key_matches_language(k, lang))
            })
            .map(|(k, _)| k.clone())
            .collect();
        for key in doomed {
            cache.pop(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

pub(crate) fn key_matches_language(key: &str, target_language: &str) -> bool {
    let Some(rest) = key.strip_prefix(KEY_PREFIX) else {
        return false;
    };
    // <namespace>:<lang>:<suffix> — namespace may not contain ':'.
    let mut parts = rest.splitn(3, ':');
    let _namespace = parts.next();
    parts.next() == Some(target_language)
}
