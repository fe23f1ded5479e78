//! Tunables for the translation pipeline. The defaults are sized for an
//! LLM-backed endpoint with a tight, unpublished rate limit; every value is
//! overridable at construction.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct TranslatorConfig {
    /// The site's single authoring language; requests targeting it are
    /// answered immediately with the source value.
    pub source_language: String,
    /// Supported target locales, excluding the source language.
    pub target_languages: Vec<String>,
    /// Requests issued concurrently per queue batch.
    pub batch_size: usize,
    /// Pause after every batch, regardless of queue depth. Caps sustained
    /// throughput to the backend.
    pub batch_delay: Duration,
    /// Idle poll interval of the queue worker (fallback to the enqueue wakeup).
    pub poll_interval: Duration,
    /// First retry delay; doubles per retry.
    pub base_retry_delay: Duration,
    /// Rate-limit retries per request before degrading to the original value.
    pub max_retries: u32,
    /// Delay before a binding's single auto-retry after a degraded resolution.
    pub binding_retry_delay: Duration,
    /// Memory tier capacity (entries).
    pub memory_capacity: usize,
    /// Persistent tier quota (entries); exceeding it triggers eviction.
    pub persistent_max_entries: usize,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            source_language: "pt".to_string(),
            target_languages: vec!["en".to_string(), "es".to_string()],
            batch_size: 2,
            batch_delay: Duration::from_millis(700),
            poll_interval: Duration::from_millis(100),
            base_retry_delay: Duration::from_millis(500),
            max_retries: 4,
            binding_retry_delay: Duration::from_millis(2500),
            memory_capacity: 512,
            persistent_max_entries: 2000,
        }
    }
}

impl TranslatorConfig {
    pub fn is_supported_target(&self, language: &str) -> bool {
        language != self.source_language
            && self.target_languages.iter().any(|l| l == language)
    }
}
