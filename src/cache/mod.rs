//! Multi-tier translation cache: in-memory LRU (tier 1) over a persistent
//! SQLite store (tier 2), read-through with promotion and write-through with
//! a quota-eviction retry. Both tiers are pure acceleration; losing either
//! never affects correctness.

pub mod memory;
pub mod persistent;

use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::Value;
use tracing::{debug, warn};

use crate::normalize::looks_like_envelope;

pub use memory::MemoryCache;
pub use persistent::{CacheError, PersistentCache};

/// Hit/miss counters per tier.
#[derive(Debug, Default)]
pub struct CacheStats {
    pub l1_hits: AtomicUsize,
    pub l1_misses: AtomicUsize,
    pub l2_hits: AtomicUsize,
    pub l2_misses: AtomicUsize,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStatsSnapshot {
    pub l1_hits: usize,
    pub l1_misses: usize,
    pub l2_hits: usize,
    pub l2_misses: usize,
}

impl CacheStats {
    fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            l1_hits: self.l1_hits.load(Ordering::Relaxed),
            l1_misses: self.l1_misses.load(Ordering::Relaxed),
            l2_hits: self.l2_hits.load(Ordering::Relaxed),
            l2_misses: self.l2_misses.load(Ordering::Relaxed),
        }
    }
}

/// Validation guard applied to every value read from any tier: the cached
/// value must have the same runtime JSON type as the original, must not look
/// like a raw upstream wrapper, and must differ from the original (a value
/// equal to its own source is not a translation).
pub fn is_valid_cached(original: &Value, cached: &Value) -> bool {
    let type_ok = match original {
        Value::String(_) => cached.is_string(),
        Value::Array(_) => cached.is_array(),
        Value::Object(_) => cached.is_object(),
        _ => !cached.is_null(),
    };
    type_ok && !looks_like_envelope(cached) && cached != original
}

pub struct TieredCache {
    memory: MemoryCache,
    persistent: Option<PersistentCache>,
    stats: CacheStats,
}

impl TieredCache {
    pub fn new(memory: MemoryCache, persistent: Option<PersistentCache>) -> Self {
        Self {
            memory,
            persistent,
            stats: CacheStats::default(),
        }
    }

    /// Memory-only cache (persistence disabled, e.g. quota permanently gone).
    pub fn memory_only(capacity: usize) -> Self {
        Self::new(MemoryCache::new(capacity), None)
    }

    /// Read through both tiers. `original` is the untranslated value the
    /// caller holds; it drives the validation guard. Invalid entries are
    /// purged from the tier that produced them and treated as misses.
    pub fn get(&self, key: &str, original: &Value) -> Option<Value> {
        if let Some(value) = self.memory.get(key) {
            if is_valid_cached(original, &value) {
                self.stats.l1_hits.fetch_add(1, Ordering::Relaxed);
                return Some(value);
            }
            warn!(key, "memory tier entry failed validation, purging");
            self.memory.remove(key);
        }
        self.stats.l1_misses.fetch_add(1, Ordering::Relaxed);

        let persistent = self.persistent.as_ref()?;
        if let Some(value) = persistent.get(key) {
            if is_valid_cached(original, &value) {
                self.stats.l2_hits.fetch_add(1, Ordering::Relaxed);
                // Promote into tier 1.
                self.memory.insert(key.to_string(), value.clone());
                return Some(value);
            }
            warn!(key, "persistent tier entry failed validation, purging");
            persistent.remove(key);
        }
        self.stats.l2_misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Write through both tiers. A persistent quota failure triggers one
    /// eviction pass and a single retry; a second failure is ignored.
    pub fn set(&self, key: &str, target_language: &str, value: &Value) {
        self.memory.insert(key.to_string(), value.clone());

        let Some(persistent) = self.persistent.as_ref() else {
            return;
        };
        match persistent.insert(key, target_language, value) {
            Ok(()) => {}
            Err(CacheError::QuotaExceeded) => {
                persistent.evict_oldest_half();
                if let Err(e) = persistent.insert(key, target_language, value) {
                    debug!(key, error = %e, "persistent write failed after eviction, skipping");
                }
            }
            Err(e) => {
                debug!(key, error = %e, "persistent write failed, skipping");
            }
        }
    }

    /// Remove one key from both tiers.
    pub fn purge(&self, key: &str) {
        self.memory.remove(key);
        if let Some(persistent) = self.persistent.as_ref() {
            persistent.remove(key);
        }
    }

    /// Bulk-clear this subsystem's entries from both tiers, optionally scoped
    /// to a single target language.
    pub fn clear(&self, target_language: Option<&str>) {
        self.memory.clear(target_language);
        if let Some(persistent) = self.persistent.as_ref() {
            persistent.clear(target_language);
        }
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }
}
