//! Translator service: the explicitly constructed object wiring config,
//! tiered cache, record store, backend, and queue. Handed to bindings by
//! `Arc`; there is no global state and no teardown beyond dropping it.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::backend::TranslateBackend;
use crate::cache::{is_valid_cached, CacheStatsSnapshot, TieredCache};
use crate::config::TranslatorConfig;
use crate::key::{build_key, canonical_serialization, source_hash};
use crate::queue::{Outcome, TranslationQueue};
use crate::store::{RecordStore, TranslationRecord};

pub struct Translator {
    config: TranslatorConfig,
    cache: Arc<TieredCache>,
    store: Arc<dyn RecordStore>,
    queue: TranslationQueue,
}

impl Translator {
    /// Wire the service. Must be called within a Tokio runtime (the queue
    /// worker is spawned here).
    pub fn new(
        config: TranslatorConfig,
        cache: TieredCache,
        store: Arc<dyn RecordStore>,
        backend: Arc<dyn TranslateBackend>,
    ) -> Arc<Self> {
        let cache = Arc::new(cache);
        let queue = TranslationQueue::spawn(
            config.clone(),
            backend,
            Arc::clone(&store),
            Arc::clone(&cache),
        );
        Arc::new(Self {
            config,
            cache,
            store,
            queue,
        })
    }

    /// Full read path: cache tiers, then the record store (two-phase lookup
    /// with a source-equality re-check), then the queue. Always resolves; a
    /// degraded outcome carries the original value.
    pub async fn translate(
        &self,
        namespace: &str,
        value: &Value,
        target_language: &str,
    ) -> Outcome {
        if value.is_null() || target_language == self.config.source_language {
            return Outcome::degraded(value.clone());
        }
        if !self.config.is_supported_target(target_language) {
            warn!(target_language, "unsupported target language, returning source");
            return Outcome::degraded(value.clone());
        }

        let key = build_key(namespace, target_language, value);
        if let Some(hit) = self.cache.get(&key, value) {
            return Outcome::translated(hit);
        }

        let hash = source_hash(value);
        if let Some(translated) = self
            .lookup_record(namespace, value, target_language, &hash)
            .await
        {
            // Write back through both tiers so the next read is local.
            self.cache.set(&key, target_language, &translated);
            return Outcome::translated(translated);
        }

        self.queue
            .request(namespace, value, target_language, &key, &hash)
            .await
    }

    /// Two-phase store lookup: exact (namespace, language, hash) first, then
    /// latest-by-namespace as drift tolerance. Both phases re-verify the
    /// stored source against the live value; store errors are a miss.
    async fn lookup_record(
        &self,
        namespace: &str,
        value: &Value,
        target_language: &str,
        hash: &str,
    ) -> Option<Value> {
        let exact = match self.store.find_exact(namespace, target_language, hash).await {
            Ok(found) => found,
            Err(e) => {
                warn!(namespace, error = %e, "record store lookup failed, treating as miss");
                return None;
            }
        };
        if let Some(record) = exact {
            if let Some(translated) = self.accept_record(value, &record) {
                debug!(namespace, target_language, "record store exact hit");
                return Some(translated);
            }
        }

        let fallback = match self.store.find_latest(namespace, target_language).await {
            Ok(found) => found,
            Err(e) => {
                warn!(namespace, error = %e, "record store fallback lookup failed");
                return None;
            }
        };
        if let Some(record) = fallback {
            if let Some(translated) = self.accept_record(value, &record) {
                debug!(namespace, target_language, "record store fallback hit");
                return Some(translated);
            }
        }
        None
    }

    /// A record is only trusted when its stored source equals the live value
    /// (guards both hash collisions and the fallback's content drift) and its
    /// translated value passes the same guard as any cached value. Equality
    /// is over the canonical form, consistent with key and hash derivation:
    /// a whitespace-variant of a stored string still matches its own record.
    fn accept_record(&self, value: &Value, record: &TranslationRecord) -> Option<Value> {
        if canonical_serialization(&record.source_value) != canonical_serialization(value) {
            return None;
        }
        if !is_valid_cached(value, &record.translated_value) {
            return None;
        }
        Some(record.translated_value.clone())
    }

    pub fn config(&self) -> &TranslatorConfig {
        &self.config
    }

    /// Bulk-clear local cache tiers, optionally scoped to one language. The
    /// record store is untouched (it is the source of truth, not a cache).
    pub fn clear_cache(&self, target_language: Option<&str>) {
        self.cache.clear(target_language);
    }

    pub fn cache_stats(&self) -> CacheStatsSnapshot {
        self.cache.stats()
    }

    /// Keys currently tracked by the queue (pending, in flight, or retrying).
    pub fn outstanding_requests(&self) -> usize {
        self.queue.outstanding()
    }
}
