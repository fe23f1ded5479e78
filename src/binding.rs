//! Consumer binding layer: a watch-channel binding that UI code observes to
//! get "the translated form of value X" with a loading flag. Re-resolves when
//! the (namespace, value, target language) identity genuinely changes, never
//! on unrelated churn, and never exposes a null translated value.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;
use tracing::debug;

use crate::cancellation::{GenerationGuard, TaskGeneration};
use crate::key::build_key;
use crate::service::Translator;

/// Observable binding state. `translated` always holds a renderable value —
/// at minimum the original input; `is_translating` is true only while a
/// request for the current identity is outstanding.
#[derive(Debug, Clone, PartialEq)]
pub struct BindingState {
    pub translated: Value,
    pub is_translating: bool,
}

impl BindingState {
    fn settled(value: Value) -> Self {
        Self {
            translated: value,
            is_translating: false,
        }
    }
}

pub struct TranslationBinding {
    service: Arc<Translator>,
    state_tx: Arc<watch::Sender<BindingState>>,
    state_rx: watch::Receiver<BindingState>,
    current_key: Mutex<Option<String>>,
    generations: TaskGeneration,
}

impl TranslationBinding {
    pub fn new(service: Arc<Translator>) -> Self {
        let (state_tx, state_rx) = watch::channel(BindingState::settled(Value::Null));
        Self {
            service,
            state_tx: Arc::new(state_tx),
            state_rx,
            current_key: Mutex::new(None),
            generations: TaskGeneration::new(),
        }
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<BindingState> {
        self.state_rx.clone()
    }

    /// Current state snapshot.
    pub fn state(&self) -> BindingState {
        self.state_rx.borrow().clone()
    }

    /// Point the binding at a (namespace, value, target language) triple.
    /// An unchanged identity is a no-op; a genuine change cancels outstanding
    /// work and issues exactly one new request. The source language or a null
    /// value settles immediately without a request.
    pub fn set_input(&self, namespace: &str, value: &Value, target_language: &str) {
        if value.is_null() || target_language == self.service.config().source_language {
            *self.current_key.lock() = None;
            self.generations.cancel_and_advance();
            self.state_tx.send_replace(BindingState::settled(value.clone()));
            return;
        }

        let key = build_key(namespace, target_language, value);
        {
            let mut current = self.current_key.lock();
            if current.as_deref() == Some(key.as_str()) {
                return;
            }
            *current = Some(key.clone());
        }

        let guard = self.generations.cancel_and_advance();
        // Show the original while the translation is outstanding.
        self.state_tx.send_replace(BindingState {
            translated: value.clone(),
            is_translating: true,
        });

        debug!(key, "binding re-resolving");
        tokio::spawn(resolve_task(
            Arc::clone(&self.service),
            Arc::clone(&self.state_tx),
            guard,
            namespace.to_string(),
            value.clone(),
            target_language.to_string(),
        ));
    }
}

impl Drop for TranslationBinding {
    fn drop(&mut self) {
        // Torn-down bindings must not apply late results.
        self.generations.cancel_all();
    }
}

/// Resolve the current identity, applying the result only if the binding
/// still points at it. A degraded resolution schedules exactly one delayed
/// retry; the retry's own degradation settles without further attempts.
async fn resolve_task(
    service: Arc<Translator>,
    state_tx: Arc<watch::Sender<BindingState>>,
    guard: GenerationGuard,
    namespace: String,
    value: Value,
    target_language: String,
) {
    let outcome = service.translate(&namespace, &value, &target_language).await;
    if !guard.should_continue() {
        return;
    }
    state_tx.send_replace(BindingState::settled(outcome.value));
    if outcome.translated {
        return;
    }

    // Single auto-retry after a fixed delay, so a transient backend outage
    // does not leave the consumer stuck on the original content.
    let delay = service.config().binding_retry_delay;
    tokio::select! {
        _ = tokio::time::sleep(delay) => {}
        _ = guard.token().cancelled() => return,
    }
    if !guard.should_continue() {
        return;
    }

    debug!(namespace, "binding auto-retry after degraded resolution");
    state_tx.send_replace(BindingState {
        translated: value.clone(),
        is_translating: true,
    });
    let retry = service.translate(&namespace, &value, &target_language).await;
    if !guard.should_continue() {
        return;
    }
    state_tx.send_replace(BindingState::settled(retry.value));
}
