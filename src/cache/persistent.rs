//! Persistent translation cache (tier 2) backed by SQLite.
//! Survives restarts; complements the in-memory LRU tier. A configurable
//! entry cap models the storage quota of the embedding environment: inserts
//! past the cap fail with `QuotaExceeded` so the tiered layer can run an
//! eviction pass.

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::key::KEY_PREFIX;

#[derive(Debug)]
pub enum CacheError {
    QuotaExceeded,
    Sqlite(String),
    Encoding(String),
}

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheError::QuotaExceeded => write!(f, "persistent cache quota exceeded"),
            CacheError::Sqlite(msg) => write!(f, "sqlite error: {msg}"),
            CacheError::Encoding(msg) => write!(f, "encoding error: {msg}"),
        }
    }
}

impl From<rusqlite::Error> for CacheError {
    fn from(e: rusqlite::Error) -> Self {
        CacheError::Sqlite(e.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::Encoding(e.to_string())
    }
}

pub struct PersistentCache {
    conn: Mutex<Connection>,
    max_entries: usize,
}

impl PersistentCache {
    /// Open (or create) the cache database at the given path.
    pub fn open(db_path: &Path, max_entries: usize) -> Result<Self, CacheError> {
        let conn = Connection::open(db_path)?;

        // WAL mode for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS translation_cache (
                cache_key TEXT PRIMARY KEY,
                target_lang TEXT NOT NULL,
                value_json TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_cache_created
                ON translation_cache(created_at);",
        )?;

        info!(path = %db_path.display(), "persistent cache opened");

        Ok(Self {
            conn: Mutex::new(conn),
            max_entries,
        })
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let conn = self.conn.lock();
        let raw: Option<String> = conn
            .query_row(
                "SELECT value_json FROM translation_cache WHERE cache_key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .ok()
            .flatten();

        let raw = raw?;
        match serde_json::from_str(&raw) {
            Ok(value) => {
                debug!(key, "persistent cache hit");
                Some(value)
            }
            Err(e) => {
                warn!(key, error = %e, "persistent cache entry undecodable, purging");
                drop(conn);
                self.remove(key);
                None
            }
        }
    }

    /// Insert an entry. Fails with `QuotaExceeded` when the cap is reached
    /// and the key is not already present (replacements never grow the table).
    pub fn insert(&self, key: &str, target_language: &str, value: &Value) -> Result<(), CacheError> {
        let encoded = serde_json::to_string(value)?;
        let conn = self.conn.lock();

        let exists: bool = conn
            .query_row(
                "SELECT 1 FROM translation_cache WHERE cache_key = ?1",
                params![key],
                |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false);

        if !exists {
            let count: usize =
                conn.query_row("SELECT COUNT(*) FROM translation_cache", [], |row| row.get(0))?;
            if count >= self.max_entries {
                return Err(CacheError::QuotaExceeded);
            }
        }

        conn.execute(
            "INSERT OR REPLACE INTO translation_cache
             (cache_key, target_lang, value_json, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![key, target_language, encoded, now_unix()],
        )?;
        Ok(())
    }

    pub fn remove(&self, key: &str) {
        let conn = self.conn.lock();
        if let Err(e) = conn.execute(
            "DELETE FROM translation_cache WHERE cache_key = ?1",
            params![key],
        ) {
            warn!(key, error = %e, "persistent cache remove failed");
        }
    }

    /// Evict roughly the oldest half of this subsystem's entries. Returns the
    /// number of rows removed.
    pub fn evict_oldest_half(&self) -> usize {
        let conn = self.conn.lock();
        let count: usize = match conn.query_row(
            "SELECT COUNT(*) FROM translation_cache WHERE cache_key LIKE ?1",
            params![format!("{KEY_PREFIX}%")],
            |row| row.get(0),
        ) {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "persistent cache eviction count failed");
                return 0;
            }
        };
        let to_remove = count.div_ceil(2);
        match conn.execute(
            "DELETE FROM translation_cache WHERE cache_key IN (
                SELECT cache_key FROM translation_cache
                WHERE cache_key LIKE ?1
                ORDER BY created_at ASC LIMIT ?2
            )",
            params![format!("{KEY_PREFIX}%"), to_remove],
        ) {
            Ok(removed) => {
                info!(removed, "persistent cache eviction pass");
                removed
            }
            Err(e) => {
                warn!(error = %e, "persistent cache eviction failed");
                0
            }
        }
    }

    /// Remove every entry under the subsystem prefix, optionally scoped to a
    /// single target language.
    pub fn clear(&self, target_language: Option<&str>) {
        let conn = self.conn.lock();
        let result = match target_language {
            Some(lang) => conn.execute(
                "DELETE FROM translation_cache WHERE cache_key LIKE ?1 AND target_lang = ?2",
                params![format!("{KEY_PREFIX}%"), lang],
            ),
            None => conn.execute(
                "DELETE FROM translation_cache WHERE cache_key LIKE ?1",
                params![format!("{KEY_PREFIX}%")],
            ),
        };
        if let Err(e) = result {
            warn!(error = %e, "persistent cache clear failed");
        }
    }

    pub fn len(&self) -> usize {
        let conn = self.conn.lock();
        conn.query_row("SELECT COUNT(*) FROM translation_cache", [], |row| row.get(0))
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Current time as Unix timestamp (seconds).
fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
