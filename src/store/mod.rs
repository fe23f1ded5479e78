//! Remote record store: durable translations shared across all clients,
//! keyed by (namespace, target_language, source_hash). The durable source of
//! truth above the local cache tiers.

pub mod http;

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use http::HttpRecordStore;

/// How a translation was produced. Auto records may be superseded by a
/// manual correction; a manual record is never implicitly overwritten by an
/// auto one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranslationMethod {
    Auto,
    Manual,
}

/// The durable translation unit, one row of the `translations` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationRecord {
    pub namespace: String,
    pub source_language: String,
    pub target_language: String,
    pub source_hash: String,
    pub source_value: Value,
    pub translated_value: Value,
    #[serde(rename = "translation_method")]
    pub method: TranslationMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f64>,
}

#[derive(Debug)]
pub enum StoreError {
    Http(String),
    Decode(String),
    Unavailable(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Http(msg) => write!(f, "record store HTTP error: {msg}"),
            StoreError::Decode(msg) => write!(f, "record store decode error: {msg}"),
            StoreError::Unavailable(msg) => write!(f, "record store unavailable: {msg}"),
        }
    }
}

/// Durable lookup/write of translation records. Implementations must make
/// `upsert` idempotent on the unique (namespace, target_language,
/// source_hash) triple: last writer wins, never a duplicate row.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Exact match on the unique triple.
    async fn find_exact(
        &self,
        namespace: &str,
        target_language: &str,
        source_hash: &str,
    ) -> Result<Option<TranslationRecord>, StoreError>;

    /// Fallback: latest record for (namespace, target_language) regardless of
    /// hash. Tolerates content drift; the caller MUST re-verify
    /// `source_value` equality before trusting `translated_value`.
    async fn find_latest(
        &self,
        namespace: &str,
        target_language: &str,
    ) -> Result<Option<TranslationRecord>, StoreError>;

    async fn upsert(&self, record: TranslationRecord) -> Result<(), StoreError>;
}

/// In-process record store. Backs tests and single-client deployments where
/// no shared backend is configured.
#[derive(Default)]
pub struct MemoryRecordStore {
    inner: Mutex<MemoryStoreState>,
}

#[derive(Default)]
struct MemoryStoreState {
    records: HashMap<(String, String, String), TranslationRecord>,
    // Insertion order, newest last, for the latest-by-namespace fallback.
    order: Vec<(String, String, String)>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn find_exact(
        &self,
        namespace: &str,
        target_language: &str,
        source_hash: &str,
    ) -> Result<Option<TranslationRecord>, StoreError> {
        let key = (
            namespace.to_string(),
            target_language.to_string(),
            source_hash.to_string(),
        );
        Ok(self.inner.lock().records.get(&key).cloned())
    }

    async fn find_latest(
        &self,
        namespace: &str,
        target_language: &str,
    ) -> Result<Option<TranslationRecord>, StoreError> {
        let state = self.inner.lock();
        let key = state
            .order
            .iter()
            .rev()
            .find(|(ns, lang, _)| ns == namespace && lang == target_language);
        Ok(key.and_then(|k| state.records.get(k)).cloned())
    }

    async fn upsert(&self, record: TranslationRecord) -> Result<(), StoreError> {
        let key = (
            record.namespace.clone(),
            record.target_language.clone(),
            record.source_hash.clone(),
        );
        let mut state = self.inner.lock();
        if let Some(existing) = state.records.get(&key) {
            // Manual corrections are never displaced by auto output.
            if existing.method == TranslationMethod::Manual
                && record.method == TranslationMethod::Auto
            {
                return Ok(());
            }
        } else {
            state.order.push(key.clone());
        }
        state.records.insert(key, record);
        Ok(())
    }
}
