//! Remote translation backend client.
//! The backend is an opaque LLM-backed service: it accepts
//! `{ "targetLanguage": .., "value": .. }` and answers HTTP 200 with
//! `{ "value": .., "error": .. }` even on soft failure, so transport-level
//! errors and payload-level degradation are both mapped here.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

/// One backend answer. `value` carries the (possibly enveloped) translation;
/// a present `error` is a soft-failure signal the queue must classify.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendReply {
    pub value: Value,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug)]
pub enum BackendError {
    Api(String),
    RateLimited,
    Timeout,
    InvalidInput(String),
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendError::Api(msg) => write!(f, "backend API error: {msg}"),
            BackendError::RateLimited => write!(f, "backend rate limited"),
            BackendError::Timeout => write!(f, "backend timeout"),
            BackendError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
        }
    }
}

/// True when an error message matches the known rate-limit signals
/// ("429", "rate_limited", "rate limit", case-insensitive).
pub fn is_rate_limit_signal(message: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let re = PATTERN.get_or_init(|| Regex::new(r"(?i)429|rate[ _-]?limit").unwrap());
    re.is_match(message)
}

/// Adapter seam for the translation backend; tests inject mocks here.
#[async_trait]
pub trait TranslateBackend: Send + Sync {
    async fn translate(
        &self,
        value: &Value,
        target_language: &str,
    ) -> Result<BackendReply, BackendError>;
}

/// HTTP client for the deployed translation endpoint.
pub struct HttpBackend {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpBackend {
    pub fn new(endpoint: &str) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| BackendError::Api(e.to_string()))?;

        Ok(Self {
            http,
            endpoint: endpoint.to_string(),
        })
    }
}

#[async_trait]
impl TranslateBackend for HttpBackend {
    async fn translate(
        &self,
        value: &Value,
        target_language: &str,
    ) -> Result<BackendReply, BackendError> {
        let body = serde_json::json!({
            "targetLanguage": target_language,
            "value": value,
        });

        let result = self.http.post(&self.endpoint).json(&body).send().await;

        let response = match result {
            Ok(resp) => resp,
            Err(e) if e.is_timeout() => return Err(BackendError::Timeout),
            Err(e) => return Err(BackendError::Api(e.to_string())),
        };

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(BackendError::RateLimited);
        }
        if status.is_client_error() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(BackendError::InvalidInput(format!(
                "status {}: {}",
                status,
                body_text.chars().take(200).collect::<String>()
            )));
        }
        if !status.is_success() {
            return Err(BackendError::Api(format!("status {status}")));
        }

        response
            .json::<BackendReply>()
            .await
            .map_err(|e| BackendError::Api(e.to_string()))
    }
}
