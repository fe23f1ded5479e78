//! HTTP record store client (PostgREST-style `translations` endpoint).
//! Lookup/write failures are surfaced as `StoreError` so the service can log
//! them and treat them as a miss/no-op; they never block translation.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{RecordStore, StoreError, TranslationMethod, TranslationRecord};

pub struct HttpRecordStore {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpRecordStore {
    /// `base_url` is the REST root; records live at `<base_url>/translations`.
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self, StoreError> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        Ok(Self {
            http,
            endpoint: format!("{}/translations", base_url.trim_end_matches('/')),
            api_key,
        })
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req
                .header("apikey", key)
                .header("Authorization", format!("Bearer {key}")),
            None => req,
        }
    }

    async fn query(
        &self,
        params: &[(&str, String)],
    ) -> Result<Option<TranslationRecord>, StoreError> {
        let response = self
            .authed(self.http.get(&self.endpoint))
            .query(params)
            .send()
            .await
            .map_err(|e| StoreError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(StoreError::Http(format!("status {}", response.status())));
        }

        let mut rows: Vec<TranslationRecord> = response
            .json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        Ok(if rows.is_empty() {
            None
        } else {
            Some(rows.swap_remove(0))
        })
    }
}

#[async_trait]
impl RecordStore for HttpRecordStore {
    async fn find_exact(
        &self,
        namespace: &str,
        target_language: &str,
        source_hash: &str,
    ) -> Result<Option<TranslationRecord>, StoreError> {
        self.query(&[
            ("namespace", format!("eq.{namespace}")),
            ("target_language", format!("eq.{target_language}")),
            ("source_hash", format!("eq.{source_hash}")),
            ("limit", "1".to_string()),
        ])
        .await
    }

    async fn find_latest(
        &self,
        namespace: &str,
        target_language: &str,
    ) -> Result<Option<TranslationRecord>, StoreError> {
        self.query(&[
            ("namespace", format!("eq.{namespace}")),
            ("target_language", format!("eq.{target_language}")),
            ("order", "created_at.desc".to_string()),
            ("limit", "1".to_string()),
        ])
        .await
    }

    async fn upsert(&self, record: TranslationRecord) -> Result<(), StoreError> {
        // Manual precedence is enforced client-side: an auto write first
        // checks whether a manual correction already owns the triple.
        if record.method == TranslationMethod::Auto {
            if let Some(existing) = self
                .find_exact(&record.namespace, &record.target_language, &record.source_hash)
                .await?
            {
                if existing.method == TranslationMethod::Manual {
                    debug!(
                        namespace = %record.namespace,
                        "skipping auto upsert over manual record"
                    );
                    return Ok(());
                }
            }
        }

        let response = self
            .authed(self.http.post(&self.endpoint))
            .query(&[("on_conflict", "namespace,target_language,source_hash")])
            .header("Prefer", "resolution=merge-duplicates")
            .json(&record)
            .send()
            .await
            .map_err(|e| StoreError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(StoreError::Http(format!("status {}", response.status())));
        }
        debug!(namespace = %record.namespace, target = %record.target_language, "record upserted");
        Ok(())
    }
}
