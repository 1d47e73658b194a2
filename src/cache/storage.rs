//! Session storage trait and its backends.
//!
//! Session storage is a flat string key/value store scoped to one login
//! session. Every operation is fallible; callers treat it as best-effort.

use color_eyre::{eyre::eyre, Result as EyreResult};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, warn};

use super::error::StorageError;

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Largest value a backend accepts, matching the usual browser budget.
pub const DEFAULT_QUOTA_BYTES: usize = 5 * 1024 * 1024;

/// Trait for session storage backends.
pub trait SessionStorage: Send + Sync {
  /// Read a value, `Ok(None)` when the key is absent.
  fn get(&self, key: &str) -> StorageResult<Option<String>>;

  /// Write a value, replacing any previous one.
  fn set(&self, key: &str, value: &str) -> StorageResult<()>;

  /// Remove a value. Removing an absent key is not an error.
  fn remove(&self, key: &str) -> StorageResult<()>;

  /// All keys currently stored.
  fn keys(&self) -> StorageResult<Vec<String>>;
}

/// Storage implementation that doesn't persist anything.
/// Used when persistence is disabled - all operations are no-ops.
pub struct NoopStorage;

impl SessionStorage for NoopStorage {
  fn get(&self, _key: &str) -> StorageResult<Option<String>> {
    Ok(None) // Always miss
  }

  fn set(&self, _key: &str, _value: &str) -> StorageResult<()> {
    Ok(()) // Discard
  }

  fn remove(&self, _key: &str) -> StorageResult<()> {
    Ok(())
  }

  fn keys(&self) -> StorageResult<Vec<String>> {
    Ok(Vec::new())
  }
}

/// Process-local storage, used in tests and when no data directory exists.
#[derive(Default)]
pub struct MemorySessionStorage {
  values: Mutex<BTreeMap<String, String>>,
}

impl MemorySessionStorage {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> StorageResult<std::sync::MutexGuard<'_, BTreeMap<String, String>>> {
    self
      .values
      .lock()
      .map_err(|e| StorageError::Unavailable(format!("lock poisoned: {}", e)))
  }
}

impl SessionStorage for MemorySessionStorage {
  fn get(&self, key: &str) -> StorageResult<Option<String>> {
    Ok(self.lock()?.get(key).cloned())
  }

  fn set(&self, key: &str, value: &str) -> StorageResult<()> {
    if value.len() > DEFAULT_QUOTA_BYTES {
      return Err(StorageError::QuotaExceeded);
    }
    self.lock()?.insert(key.to_string(), value.to_string());
    Ok(())
  }

  fn remove(&self, key: &str) -> StorageResult<()> {
    self.lock()?.remove(key);
    Ok(())
  }

  fn keys(&self) -> StorageResult<Vec<String>> {
    Ok(self.lock()?.keys().cloned().collect())
  }
}

/// SQLite-based session storage.
///
/// All sessions share one database file; rows are namespaced by a session id
/// derived from the API endpoint and credentials, so a new login never sees
/// another session's entries. Opening a session deletes every other
/// session's rows.
pub struct SqliteSessionStorage {
  conn: Mutex<Connection>,
  session_id: String,
  quota_bytes: usize,
}

/// Schema for the session storage table.
const SESSION_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS session_storage (
    session_id TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (session_id, key)
);

CREATE INDEX IF NOT EXISTS idx_session_storage_session
    ON session_storage(session_id);
"#;

impl SqliteSessionStorage {
  /// Open the session storage at the default location.
  pub fn open(session_id: &str) -> EyreResult<Self> {
    let path = Self::default_path()?;

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create session directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open session storage at {}: {}", path.display(), e))?;

    Self::with_connection(conn, session_id)
  }

  /// Open a private in-memory database.
  #[cfg(test)]
  pub fn open_in_memory(session_id: &str) -> EyreResult<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory session storage: {}", e))?;
    Self::with_connection(conn, session_id)
  }

  fn with_connection(conn: Connection, session_id: &str) -> EyreResult<Self> {
    conn
      .execute_batch(SESSION_SCHEMA)
      .map_err(|e| eyre!("Failed to run session storage migrations: {}", e))?;

    // Only the current session's rows are kept.
    match conn.execute(
      "DELETE FROM session_storage WHERE session_id != ?",
      params![session_id],
    ) {
      Ok(0) => {}
      Ok(purged) => debug!(purged, "removed rows of previous sessions"),
      Err(e) => warn!(error = %e, "failed to purge previous sessions"),
    }

    Ok(Self {
      conn: Mutex::new(conn),
      session_id: session_id.to_string(),
      quota_bytes: DEFAULT_QUOTA_BYTES,
    })
  }

  /// Override the per-value size limit.
  #[cfg(test)]
  pub fn with_quota(mut self, quota_bytes: usize) -> Self {
    self.quota_bytes = quota_bytes;
    self
  }

  /// Get the default database path.
  fn default_path() -> EyreResult<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("etribe").join("session.db"))
  }

  fn lock(&self) -> StorageResult<std::sync::MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| StorageError::Unavailable(format!("lock poisoned: {}", e)))
  }
}

impl SessionStorage for SqliteSessionStorage {
  fn get(&self, key: &str) -> StorageResult<Option<String>> {
    let conn = self.lock()?;
    let value = conn
      .query_row(
        "SELECT value FROM session_storage WHERE session_id = ? AND key = ?",
        params![self.session_id, key],
        |row| row.get(0),
      )
      .optional()?;
    Ok(value)
  }

  fn set(&self, key: &str, value: &str) -> StorageResult<()> {
    if value.len() > self.quota_bytes {
      return Err(StorageError::QuotaExceeded);
    }
    let conn = self.lock()?;
    conn.execute(
      "INSERT OR REPLACE INTO session_storage (session_id, key, value, updated_at)
       VALUES (?, ?, ?, datetime('now'))",
      params![self.session_id, key, value],
    )?;
    Ok(())
  }

  fn remove(&self, key: &str) -> StorageResult<()> {
    let conn = self.lock()?;
    conn.execute(
      "DELETE FROM session_storage WHERE session_id = ? AND key = ?",
      params![self.session_id, key],
    )?;
    Ok(())
  }

  fn keys(&self) -> StorageResult<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt =
      conn.prepare("SELECT key FROM session_storage WHERE session_id = ? ORDER BY key")?;
    let keys: Vec<String> = stmt
      .query_map(params![self.session_id], |row| row.get(0))?
      .filter_map(|r| r.ok())
      .collect();
    Ok(keys)
  }
}

/// Derive a stable session namespace from the endpoint and credentials.
///
/// The raw token never reaches the database; only a truncated SHA256 digest.
pub fn session_namespace(base_url: &str, token: Option<&str>) -> String {
  let mut hasher = Sha256::new();
  hasher.update(base_url.trim_end_matches('/').as_bytes());
  hasher.update(b"\0");
  hasher.update(token.unwrap_or("anonymous").as_bytes());
  let digest = hex::encode(hasher.finalize());
  digest[..16].to_string()
}
