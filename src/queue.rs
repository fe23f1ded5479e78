//! Translation queue manager: batches pending requests, applies
//! rate-limit-aware exponential backoff, deduplicates in-flight requests for
//! identical keys, and resolves every caller. Translation is best-effort and
//! never surfaces a hard failure.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use futures_util::future::join_all;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{oneshot, Notify};
use tracing::{debug, info, warn};

use crate::backend::{is_rate_limit_signal, BackendError, TranslateBackend};
use crate::cache::TieredCache;
use crate::config::TranslatorConfig;
use crate::normalize::normalize;
use crate::store::{RecordStore, TranslationMethod, TranslationRecord};

/// Terminal outcome of a translation request. Caller futures always resolve;
/// `translated == false` marks a degraded resolution carrying the original.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub value: Value,
    pub translated: bool,
}

impl Outcome {
    pub fn translated(value: Value) -> Self {
        Self {
            value,
            translated: true,
        }
    }

    pub fn degraded(value: Value) -> Self {
        Self {
            value,
            translated: false,
        }
    }
}

/// Request lifecycle. Requested→Pending on enqueue; a duplicate key in any of
/// these states joins the existing entry's waiters instead of re-enqueuing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestState {
    Pending,
    InFlight,
    Retrying,
}

struct QueueEntry {
    request_id: String,
    namespace: String,
    target_language: String,
    source_value: Value,
    source_hash: String,
    retry_count: u32,
    state: RequestState,
    waiters: Vec<oneshot::Sender<Outcome>>,
}

#[derive(Default)]
struct QueueState {
    entries: HashMap<String, QueueEntry>,
    /// FIFO of Pending keys. Retrying keys re-enter after their backoff.
    order: VecDeque<String>,
}

struct QueueInner {
    state: Mutex<QueueState>,
    notify: Notify,
    config: TranslatorConfig,
    backend: Arc<dyn TranslateBackend>,
    store: Arc<dyn RecordStore>,
    cache: Arc<TieredCache>,
}

pub struct TranslationQueue {
    inner: Arc<QueueInner>,
}

impl TranslationQueue {
    /// Create the queue and start its worker task. Must be called within a
    /// Tokio runtime; the worker exits when the queue is dropped.
    pub fn spawn(
        config: TranslatorConfig,
        backend: Arc<dyn TranslateBackend>,
        store: Arc<dyn RecordStore>,
        cache: Arc<TieredCache>,
    ) -> Self {
        let inner = Arc::new(QueueInner {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            config,
            backend,
            store,
            cache,
        });

        let weak = Arc::downgrade(&inner);
        tokio::spawn(async move {
            info!("translation queue worker started");
            while let Some(inner) = weak.upgrade() {
                step(inner).await;
            }
            info!("translation queue worker exiting");
        });

        Self { inner }
    }

    /// Enqueue a translation (or join an outstanding one with the same key)
    /// and await its outcome. Never returns an error: exhausted retries and
    /// backend failures resolve with the original value.
    pub async fn request(
        &self,
        namespace: &str,
        source_value: &Value,
        target_language: &str,
        key: &str,
        source_hash: &str,
    ) -> Outcome {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.inner.state.lock();
            if let Some(entry) = state.entries.get_mut(key) {
                debug!(key, "deduplicated onto outstanding request");
                entry.waiters.push(tx);
            } else {
                let request_id = uuid::Uuid::new_v4().to_string();
                debug!(key, request_id = %request_id, "enqueued");
                state.entries.insert(
                    key.to_string(),
                    QueueEntry {
                        request_id,
                        namespace: namespace.to_string(),
                        target_language: target_language.to_string(),
                        source_value: source_value.clone(),
                        source_hash: source_hash.to_string(),
                        retry_count: 0,
                        state: RequestState::Pending,
                        waiters: vec![tx],
                    },
                );
                state.order.push_back(key.to_string());
                self.inner.notify.notify_one();
            }
        }

        // A dropped sender means the worker disappeared mid-flight; degrade.
        rx.await
            .unwrap_or_else(|_| Outcome::degraded(source_value.clone()))
    }

    /// Number of keys currently tracked (pending, in flight, or retrying).
    pub fn outstanding(&self) -> usize {
        self.inner.state.lock().entries.len()
    }
}

/// One worker cycle: wait for work, issue a batch concurrently, then hold for
/// the batch delay. The delay applies after every batch, whatever the queue
/// depth, capping sustained throughput to the backend.
async fn step(inner: Arc<QueueInner>) {
    if inner.state.lock().order.is_empty() {
        tokio::select! {
            _ = inner.notify.notified() => {}
            _ = tokio::time::sleep(inner.config.poll_interval) => {}
        }
        if inner.state.lock().order.is_empty() {
            return;
        }
    }

    let batch: Vec<String> = {
        let mut state = inner.state.lock();
        let mut keys = Vec::new();
        while keys.len() < inner.config.batch_size {
            let Some(key) = state.order.pop_front() else {
                break;
            };
            if let Some(entry) = state.entries.get_mut(&key) {
                entry.state = RequestState::InFlight;
                keys.push(key);
            }
        }
        keys
    };

    if !batch.is_empty() {
        debug!(batch = batch.len(), "issuing batch");
        join_all(
            batch
                .into_iter()
                .map(|key| process_one(Arc::clone(&inner), key)),
        )
        .await;
    }

    tokio::time::sleep(inner.config.batch_delay).await;
}

async fn process_one(inner: Arc<QueueInner>, key: String) {
    let Some((source_value, target_language, request_id)) = ({
        let state = inner.state.lock();
        state.entries.get(&key).map(|e| {
            (
                e.source_value.clone(),
                e.target_language.clone(),
                e.request_id.clone(),
            )
        })
    }) else {
        return;
    };

    let result = inner.backend.translate(&source_value, &target_language).await;

    match result {
        Ok(reply) => {
            if let Some(message) = reply.error {
                if is_rate_limit_signal(&message) {
                    schedule_retry(&inner, &key, &request_id);
                } else {
                    warn!(key, request_id = %request_id, error = %message, "backend soft failure, degrading");
                    resolve(&inner, &key, Outcome::degraded(source_value));
                }
                return;
            }

            let normalized = normalize(&source_value, reply.value);
            if normalized == source_value {
                // Pollution guard: a no-op "translation" resolves the caller
                // but leaves no trace in any tier or the record store, so a
                // future request retries instead of caching the no-op.
                debug!(key, request_id = %request_id, "result equals source, not persisting");
                resolve(&inner, &key, Outcome::degraded(source_value));
                return;
            }

            persist(&inner, &key, &normalized);
            resolve(&inner, &key, Outcome::translated(normalized));
        }
        Err(BackendError::RateLimited) => {
            schedule_retry(&inner, &key, &request_id);
        }
        Err(e) => {
            warn!(key, request_id = %request_id, error = %e, "backend failure, degrading");
            resolve(&inner, &key, Outcome::degraded(source_value));
        }
    }
}

/// Write a successful translation through both cache tiers and fire-and-forget
/// it into the record store; a store failure is logged, never propagated.
fn persist(inner: &Arc<QueueInner>, key: &str, translated: &Value) {
    let Some(entry_fields) = ({
        let state = inner.state.lock();
        state.entries.get(key).map(|e| {
            (
                e.namespace.clone(),
                e.target_language.clone(),
                e.source_hash.clone(),
                e.source_value.clone(),
            )
        })
    }) else {
        return;
    };
    let (namespace, target_language, source_hash, source_value) = entry_fields;

    inner.cache.set(key, &target_language, translated);

    let record = TranslationRecord {
        namespace,
        source_language: inner.config.source_language.clone(),
        target_language,
        source_hash,
        source_value,
        translated_value: translated.clone(),
        method: TranslationMethod::Auto,
        quality_score: None,
    };
    let store = Arc::clone(&inner.store);
    let key = key.to_string();
    tokio::spawn(async move {
        if let Err(e) = store.upsert(record).await {
            warn!(key, error = %e, "record store upsert failed");
        }
    });
}

/// Re-enqueue after `base_retry_delay * 2^retry_count`, bounded by
/// `max_retries`; exhaustion degrades to the original value. Retries keep
/// their waiters and flow through the same batch queue, never a fast path.
fn schedule_retry(inner: &Arc<QueueInner>, key: &str, request_id: &str) {
    let delay = {
        let mut state = inner.state.lock();
        let Some(entry) = state.entries.get_mut(key) else {
            return;
        };
        if entry.retry_count >= inner.config.max_retries {
            let original = entry.source_value.clone();
            drop(state);
            warn!(key, request_id, "retries exhausted, degrading");
            resolve(inner, key, Outcome::degraded(original));
            return;
        }
        let delay = inner.config.base_retry_delay * 2u32.saturating_pow(entry.retry_count);
        entry.retry_count += 1;
        entry.state = RequestState::Retrying;
        delay
    };

    debug!(key, request_id, wait_ms = delay.as_millis() as u64, "rate limited, retrying");
    let weak = Arc::downgrade(inner);
    let key = key.to_string();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let Some(inner) = weak.upgrade() else {
            return;
        };
        let mut state = inner.state.lock();
        if let Some(entry) = state.entries.get_mut(&key) {
            if entry.state == RequestState::Retrying {
                entry.state = RequestState::Pending;
                state.order.push_back(key);
                inner.notify.notify_one();
            }
        }
    });
}

/// Remove the entry and resolve every waiter with the outcome.
fn resolve(inner: &Arc<QueueInner>, key: &str, outcome: Outcome) {
    let waiters = {
        let mut state = inner.state.lock();
        match state.entries.remove(key) {
            Some(entry) => entry.waiters,
            None => return,
        }
    };
    for waiter in waiters {
        let _ = waiter.send(outcome.clone());
    }
}
