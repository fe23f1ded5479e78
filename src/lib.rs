//! auto-i18n: client-side auto-translation cache and queue manager.
//! Layered read path (memory → persistent SQLite → shared record store →
//! translation backend) with a rate-limited batching queue, request
//! deduplication, response normalization, and graceful degradation. Callers
//! always resolve with a usable value, never an error.

pub mod backend;
pub mod binding;
pub mod cache;
pub mod cancellation;
pub mod config;
pub mod key;
pub mod normalize;
pub mod queue;
pub mod service;
pub mod store;

pub use backend::{BackendError, BackendReply, HttpBackend, TranslateBackend};
pub use binding::{BindingState, TranslationBinding};
pub use cache::{MemoryCache, PersistentCache, TieredCache};
pub use config::TranslatorConfig;
pub use queue::Outcome;
pub use service::Translator;
pub use store::{
    HttpRecordStore, MemoryRecordStore, RecordStore, TranslationMethod, TranslationRecord,
};

use tracing::info;

/// Initialize tracing for binaries and manual runs. Honors `RUST_LOG`.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "auto_i18n=debug".parse().unwrap_or_default()),
        )
        .with_target(true)
        .init();

    info!("auto-i18n tracing initialized");
}
