//! End-to-end pipeline tests: service → cache tiers → record store → queue →
//! mock backend, plus the consumer binding layer on top.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use auto_i18n::{
    BackendError, BackendReply, BindingState, MemoryRecordStore, Outcome, RecordStore,
    TieredCache, TranslateBackend, TranslationBinding, TranslationMethod, TranslationRecord,
    Translator, TranslatorConfig,
};

/// Scripted backend: the closure receives the zero-based call index and
/// decides the reply. Counts every call for dedup/retry assertions.
struct MockBackend {
    calls: AtomicUsize,
    delay: Option<Duration>,
    respond: Box<dyn Fn(usize, &Value, &str) -> Result<BackendReply, BackendError> + Send + Sync>,
}

impl MockBackend {
    fn new(
        respond: impl Fn(usize, &Value, &str) -> Result<BackendReply, BackendError>
            + Send
            + Sync
            + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay: None,
            respond: Box::new(respond),
        })
    }

    /// A backend whose every call takes `delay` to answer, for tests that
    /// need a request to still be in flight while the caller acts.
    fn new_with_delay(
        delay: Duration,
        respond: impl Fn(usize, &Value, &str) -> Result<BackendReply, BackendError>
            + Send
            + Sync
            + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay: Some(delay),
            respond: Box::new(respond),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TranslateBackend for MockBackend {
    async fn translate(
        &self,
        value: &Value,
        target_language: &str,
    ) -> Result<BackendReply, BackendError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.respond)(n, value, target_language)
    }
}

fn fast_config() -> TranslatorConfig {
    TranslatorConfig {
        batch_size: 2,
        batch_delay: Duration::from_millis(10),
        poll_interval: Duration::from_millis(5),
        base_retry_delay: Duration::from_millis(5),
        max_retries: 4,
        binding_retry_delay: Duration::from_millis(50),
        ..TranslatorConfig::default()
    }
}

fn make_service(backend: Arc<MockBackend>) -> (Arc<Translator>, Arc<MemoryRecordStore>) {
    let store = Arc::new(MemoryRecordStore::new());
    let service = Translator::new(
        fast_config(),
        TieredCache::memory_only(64),
        Arc::clone(&store) as Arc<dyn RecordStore>,
        backend as Arc<dyn TranslateBackend>,
    );
    (service, store)
}

/// Await the record-store writes spawned fire-and-forget by the queue.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

const SOURCE: &str = "Festival de Cultura";
const TRANSLATED: &str = "Culture Festival";

#[tokio::test]
async fn scenario_a_plain_success() {
    let backend = MockBackend::new(|_, _, _| {
        Ok(BackendReply {
            value: json!(TRANSLATED),
            error: None,
        })
    });
    let (service, store) = make_service(Arc::clone(&backend));

    let outcome = service.translate("title_1", &json!(SOURCE), "en").await;
    assert_eq!(outcome, Outcome::translated(json!(TRANSLATED)));
    assert_eq!(backend.calls(), 1);

    settle().await;
    let hash = auto_i18n::key::source_hash(&json!(SOURCE));
    let record = store
        .find_exact("title_1", "en", &hash)
        .await
        .expect("store lookup")
        .expect("record written");
    assert_eq!(record.translated_value, json!(TRANSLATED));
    assert_eq!(record.source_value, json!(SOURCE));
    assert_eq!(record.method, TranslationMethod::Auto);

    // Second request is a local cache hit: no new backend call.
    let again = service.translate("title_1", &json!(SOURCE), "en").await;
    assert_eq!(again, Outcome::translated(json!(TRANSLATED)));
    assert_eq!(backend.calls(), 1);
}

#[tokio::test]
async fn scenario_b_double_encoded_envelope() {
    let backend = MockBackend::new(|_, _, _| {
        Ok(BackendReply {
            value: json!({"json": "\"Culture Festival\""}),
            error: None,
        })
    });
    let (service, store) = make_service(Arc::clone(&backend));

    let outcome = service.translate("title_1", &json!(SOURCE), "en").await;
    assert_eq!(outcome, Outcome::translated(json!(TRANSLATED)));

    settle().await;
    let hash = auto_i18n::key::source_hash(&json!(SOURCE));
    let record = store
        .find_exact("title_1", "en", &hash)
        .await
        .expect("store lookup")
        .expect("record written");
    assert_eq!(record.translated_value, json!(TRANSLATED));
}

#[tokio::test]
async fn scenario_c_rate_limit_then_success() {
    let backend = MockBackend::new(|n, value, _| {
        if n == 0 {
            Ok(BackendReply {
                value: value.clone(),
                error: Some("rate_limited".to_string()),
            })
        } else {
            Ok(BackendReply {
                value: json!(TRANSLATED),
                error: None,
            })
        }
    });
    let (service, _store) = make_service(Arc::clone(&backend));

    let outcome = service.translate("title_1", &json!(SOURCE), "en").await;
    assert_eq!(outcome, Outcome::translated(json!(TRANSLATED)));
    assert_eq!(backend.calls(), 2);
    assert!(backend.calls() <= fast_config().max_retries as usize + 1);
}

#[tokio::test]
async fn scenario_d_retries_exhaust_to_original() {
    let backend = MockBackend::new(|_, _, _| Err(BackendError::RateLimited));
    let (service, store) = make_service(Arc::clone(&backend));

    let outcome = service.translate("title_1", &json!(SOURCE), "en").await;
    assert_eq!(outcome, Outcome::degraded(json!(SOURCE)));
    // maxRetries + 1 total attempts, no more.
    assert_eq!(backend.calls(), fast_config().max_retries as usize + 1);

    settle().await;
    assert!(store.is_empty());
    assert_eq!(service.cache_stats().l1_hits, 0);
    assert_eq!(service.outstanding_requests(), 0);
}

#[tokio::test]
async fn record_store_hit_short_circuits_the_queue() {
    let backend = MockBackend::new(|_, _, _| {
        panic!("backend must not be called on a record store hit");
    });
    let (service, store) = make_service(Arc::clone(&backend));

    let hash = auto_i18n::key::source_hash(&json!(SOURCE));
    store
        .upsert(TranslationRecord {
            namespace: "title_1".to_string(),
            source_language: "pt".to_string(),
            target_language: "en".to_string(),
            source_hash: hash,
            source_value: json!(SOURCE),
            translated_value: json!(TRANSLATED),
            method: TranslationMethod::Auto,
            quality_score: None,
        })
        .await
        .expect("prepopulate");

    let outcome = service.translate("title_1", &json!(SOURCE), "en").await;
    assert_eq!(outcome, Outcome::translated(json!(TRANSLATED)));
    assert_eq!(backend.calls(), 0);

    // Written back into the local tier: subsequent reads are L1 hits.
    let again = service.translate("title_1", &json!(SOURCE), "en").await;
    assert_eq!(again, Outcome::translated(json!(TRANSLATED)));
    assert_eq!(service.cache_stats().l1_hits, 1);
}

#[tokio::test]
async fn fallback_record_requires_source_equality() {
    let backend = MockBackend::new(|_, _, _| {
        Ok(BackendReply {
            value: json!("New Translation"),
            error: None,
        })
    });
    let (service, store) = make_service(Arc::clone(&backend));

    // A record for the same namespace but different (older) content.
    store
        .upsert(TranslationRecord {
            namespace: "title_1".to_string(),
            source_language: "pt".to_string(),
            target_language: "en".to_string(),
            source_hash: auto_i18n::key::source_hash(&json!("Texto antigo")),
            source_value: json!("Texto antigo"),
            translated_value: json!("Old Translation"),
            method: TranslationMethod::Auto,
            quality_score: None,
        })
        .await
        .expect("prepopulate");

    // The live value differs from the stored source, so the namespace-level
    // fallback must be rejected and the backend consulted.
    let outcome = service.translate("title_1", &json!(SOURCE), "en").await;
    assert_eq!(outcome, Outcome::translated(json!("New Translation")));
    assert_eq!(backend.calls(), 1);
}

#[tokio::test]
async fn concurrent_identical_requests_deduplicate() {
    let backend = MockBackend::new(|_, _, _| {
        Ok(BackendReply {
            value: json!(TRANSLATED),
            error: None,
        })
    });
    let (service, _store) = make_service(Arc::clone(&backend));

    let source = json!(SOURCE);
    let (a, b) = tokio::join!(
        service.translate("title_1", &source, "en"),
        service.translate("title_1", &source, "en"),
    );
    assert_eq!(a, Outcome::translated(json!(TRANSLATED)));
    assert_eq!(b, Outcome::translated(json!(TRANSLATED)));
    assert_eq!(backend.calls(), 1);
}

#[tokio::test]
async fn noop_translation_is_never_persisted() {
    let backend = MockBackend::new(|_, value, _| {
        // Backend echoes the input unchanged (soft failure without error).
        Ok(BackendReply {
            value: value.clone(),
            error: None,
        })
    });
    let (service, store) = make_service(Arc::clone(&backend));

    let outcome = service.translate("title_1", &json!(SOURCE), "en").await;
    assert_eq!(outcome, Outcome::degraded(json!(SOURCE)));

    settle().await;
    assert!(store.is_empty());

    // Still a miss: the next request goes to the backend again.
    let again = service.translate("title_1", &json!(SOURCE), "en").await;
    assert_eq!(again, Outcome::degraded(json!(SOURCE)));
    assert_eq!(backend.calls(), 2);
}

#[tokio::test]
async fn unsupported_or_source_language_short_circuits() {
    let backend = MockBackend::new(|_, _, _| {
        panic!("backend must not be called");
    });
    let (service, _store) = make_service(Arc::clone(&backend));

    let same = service.translate("title_1", &json!(SOURCE), "pt").await;
    assert_eq!(same, Outcome::degraded(json!(SOURCE)));

    let unknown = service.translate("title_1", &json!(SOURCE), "fr").await;
    assert_eq!(unknown, Outcome::degraded(json!(SOURCE)));

    let null = service.translate("title_1", &Value::Null, "en").await;
    assert_eq!(null, Outcome::degraded(Value::Null));
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn structured_values_translate_whole() {
    let backend = MockBackend::new(|_, _, _| {
        Ok(BackendReply {
            value: json!({"value": ["one", "two"]}),
            error: None,
        })
    });
    let (service, _store) = make_service(Arc::clone(&backend));

    let outcome = service.translate("tags_1", &json!(["um", "dois"]), "en").await;
    assert_eq!(outcome, Outcome::translated(json!(["one", "two"])));
}

#[tokio::test]
async fn persistent_tier_survives_service_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = dir.path().join("cache.db");
    let store = Arc::new(MemoryRecordStore::new());

    let backend = MockBackend::new(|_, _, _| {
        Ok(BackendReply {
            value: json!(TRANSLATED),
            error: None,
        })
    });
    {
        let persistent =
            auto_i18n::PersistentCache::open(&db, 100).expect("open persistent cache");
        let cache = TieredCache::new(auto_i18n::MemoryCache::new(16), Some(persistent));
        let service = Translator::new(
            fast_config(),
            cache,
            Arc::clone(&store) as Arc<dyn RecordStore>,
            Arc::clone(&backend) as Arc<dyn TranslateBackend>,
        );
        let outcome = service.translate("title_1", &json!(SOURCE), "en").await;
        assert_eq!(outcome, Outcome::translated(json!(TRANSLATED)));
        assert_eq!(backend.calls(), 1);
    }

    // Fresh memory tier and an empty record store; tier 2 must answer alone.
    let failing_backend = MockBackend::new(|_, _, _| {
        panic!("backend must not be called on a persistent tier hit");
    });
    let persistent = auto_i18n::PersistentCache::open(&db, 100).expect("reopen persistent cache");
    let cache = TieredCache::new(auto_i18n::MemoryCache::new(16), Some(persistent));
    let service = Translator::new(
        fast_config(),
        cache,
        Arc::new(MemoryRecordStore::new()) as Arc<dyn RecordStore>,
        failing_backend as Arc<dyn TranslateBackend>,
    );
    let outcome = service.translate("title_1", &json!(SOURCE), "en").await;
    assert_eq!(outcome, Outcome::translated(json!(TRANSLATED)));
}

// --- Consumer binding layer ---

async fn wait_settled(
    rx: &mut tokio::sync::watch::Receiver<BindingState>,
    accept: impl Fn(&BindingState) -> bool,
) -> BindingState {
    tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            {
                let state = rx.borrow().clone();
                if !state.is_translating && accept(&state) {
                    return state;
                }
            }
            rx.changed().await.expect("binding state channel closed");
        }
    })
    .await
    .expect("binding did not settle in time")
}

#[tokio::test]
async fn binding_settles_with_translation() {
    let backend = MockBackend::new(|_, _, _| {
        Ok(BackendReply {
            value: json!(TRANSLATED),
            error: None,
        })
    });
    let (service, _store) = make_service(Arc::clone(&backend));

    let binding = TranslationBinding::new(service);
    let mut rx = binding.subscribe();
    binding.set_input("title_1", &json!(SOURCE), "en");

    let settled = wait_settled(&mut rx, |s| s.translated == json!(TRANSLATED)).await;
    assert_eq!(settled.translated, json!(TRANSLATED));
    assert!(!settled.is_translating);
}

#[tokio::test]
async fn binding_source_language_settles_immediately() {
    let backend = MockBackend::new(|_, _, _| {
        panic!("backend must not be called");
    });
    let (service, _store) = make_service(Arc::clone(&backend));

    let binding = TranslationBinding::new(service);
    binding.set_input("title_1", &json!(SOURCE), "pt");
    let state = binding.state();
    assert_eq!(state.translated, json!(SOURCE));
    assert!(!state.is_translating);
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn binding_never_exposes_null_for_nonnull_input() {
    // Backend permanently rate-limits: binding must fall back to the source.
    let backend = MockBackend::new(|_, _, _| Err(BackendError::RateLimited));
    let (service, _store) = make_service(Arc::clone(&backend));

    let binding = TranslationBinding::new(service);
    let mut rx = binding.subscribe();
    binding.set_input("title_1", &json!(SOURCE), "en");

    let settled = wait_settled(&mut rx, |s| s.translated == json!(SOURCE)).await;
    assert_eq!(settled.translated, json!(SOURCE));
    assert!(!settled.translated.is_null());
}

#[tokio::test]
async fn binding_identity_noop_does_not_rerequest() {
    let backend = MockBackend::new(|_, _, _| {
        Ok(BackendReply {
            value: json!(TRANSLATED),
            error: None,
        })
    });
    let (service, _store) = make_service(Arc::clone(&backend));

    let binding = TranslationBinding::new(service);
    let mut rx = binding.subscribe();
    binding.set_input("title_1", &json!(SOURCE), "en");
    // Unrelated re-render: identical triple must not issue a new request.
    binding.set_input("title_1", &json!(SOURCE), "en");

    wait_settled(&mut rx, |s| s.translated == json!(TRANSLATED)).await;
    assert_eq!(backend.calls(), 1);
}

#[tokio::test]
async fn binding_ignores_stale_result_after_identity_change() {
    let backend = MockBackend::new_with_delay(Duration::from_millis(30), |_, _, lang| {
        Ok(BackendReply {
            value: json!(format!("Translated {lang}")),
            error: None,
        })
    });
    let (service, _store) = make_service(Arc::clone(&backend));

    let binding = TranslationBinding::new(service);
    let mut rx = binding.subscribe();
    let source = json!(SOURCE);

    binding.set_input("title_1", &source, "en");
    // Let the first request reach the backend, then change identity.
    tokio::time::sleep(Duration::from_millis(5)).await;
    binding.set_input("title_1", &source, "es");

    let settled = wait_settled(&mut rx, |s| s.translated == json!("Translated es")).await;
    assert_eq!(settled.translated, json!("Translated es"));

    // The first request still completes inside the queue, but its result
    // must never land on the binding.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let state = binding.state();
    assert_eq!(state.translated, json!("Translated es"));
    assert!(!state.is_translating);
    assert_eq!(backend.calls(), 2);
}

#[tokio::test]
async fn dropped_binding_never_applies_results() {
    let backend = MockBackend::new_with_delay(Duration::from_millis(30), |_, _, _| {
        Ok(BackendReply {
            value: json!(TRANSLATED),
            error: None,
        })
    });
    let (service, _store) = make_service(Arc::clone(&backend));

    let binding = TranslationBinding::new(service);
    let mut rx = binding.subscribe();
    binding.set_input("title_1", &json!(SOURCE), "en");
    // Observe the loading state, then tear the binding down mid-flight.
    let loading = rx.borrow_and_update().clone();
    assert!(loading.is_translating);
    drop(binding);

    let changed = tokio::time::timeout(Duration::from_millis(200), rx.changed()).await;
    assert!(changed.is_err(), "no state may be applied after teardown");
    assert!(rx.borrow().is_translating);
    assert_eq!(backend.calls(), 1);
}

#[tokio::test]
async fn whitespace_variant_reuses_stored_record() {
    let backend = MockBackend::new(|_, _, _| {
        panic!("backend must not be called for a whitespace-variant re-request");
    });
    let (service, store) = make_service(Arc::clone(&backend));

    store
        .upsert(TranslationRecord {
            namespace: "title_1".to_string(),
            source_language: "pt".to_string(),
            target_language: "en".to_string(),
            source_hash: auto_i18n::key::source_hash(&json!(SOURCE)),
            source_value: json!(SOURCE),
            translated_value: json!(TRANSLATED),
            method: TranslationMethod::Auto,
            quality_score: None,
        })
        .await
        .expect("prepopulate");

    // Same content up to leading/trailing whitespace: shares key and hash,
    // and must be served from the stored record.
    let padded = json!("  Festival de Cultura ");
    let outcome = service.translate("title_1", &padded, "en").await;
    assert_eq!(outcome, Outcome::translated(json!(TRANSLATED)));
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn binding_auto_retries_once_after_degradation() {
    let attempts_before_recovery = fast_config().max_retries as usize + 1;
    let backend = MockBackend::new(move |n, value, _| {
        if n < attempts_before_recovery {
            Ok(BackendReply {
                value: value.clone(),
                error: Some("429".to_string()),
            })
        } else {
            Ok(BackendReply {
                value: json!(TRANSLATED),
                error: None,
            })
        }
    });
    let (service, _store) = make_service(Arc::clone(&backend));

    let binding = TranslationBinding::new(service);
    let mut rx = binding.subscribe();
    binding.set_input("title_1", &json!(SOURCE), "en");

    // First resolution exhausts retries and degrades; the binding's single
    // scheduled retry then succeeds.
    let settled = wait_settled(&mut rx, |s| s.translated == json!(TRANSLATED)).await;
    assert_eq!(settled.translated, json!(TRANSLATED));
    assert_eq!(backend.calls(), attempts_before_recovery + 1);
}
