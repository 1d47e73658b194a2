//! Session persistence adapter.
//!
//! Mirrors cache entries into session storage so that a restart within the
//! same session can skip redundant fetches. Persistence is an optimization:
//! every storage failure is logged and swallowed, and the in-memory cache
//! keeps working without it.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, warn};

use super::storage::SessionStorage;
use super::traits::{CacheEntry, PersistMode, ResourceId};

/// Prefix of every key this adapter owns. Keys outside it are left alone.
pub const KEY_PREFIX: &str = "etribe.cache.";

/// What is stored for one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PersistedEntry {
  // Summary must come first: a missing `data` field would otherwise
  // deserialize as `Value::Null` and match `Full`.
  Summary {
    timestamp: i64,
    version: u32,
    #[serde(rename = "dataSize")]
    data_size: usize,
  },
  Full {
    data: Value,
    timestamp: i64,
    version: u32,
  },
}

impl PersistedEntry {
  pub fn timestamp(&self) -> i64 {
    match self {
      Self::Full { timestamp, .. } | Self::Summary { timestamp, .. } => *timestamp,
    }
  }

  pub fn data_size(&self) -> usize {
    match self {
      Self::Full { data, .. } => super::traits::data_size(data),
      Self::Summary { data_size, .. } => *data_size,
    }
  }

  /// The full cache entry, when the payload was persisted.
  pub fn into_entry(self) -> Option<CacheEntry<Value>> {
    match self {
      Self::Full {
        data,
        timestamp,
        version,
      } => Some(CacheEntry {
        data,
        timestamp,
        version,
      }),
      Self::Summary { .. } => None,
    }
  }
}

/// Persistence policy override from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PersistPolicy {
  /// Each resource decides
  #[default]
  PerResource,
  /// Every resource persisted with the given mode
  Uniform(PersistMode),
}

/// Adapter between the cache store and a `SessionStorage` backend.
pub struct SessionPersistence<K: ResourceId> {
  storage: Arc<dyn SessionStorage>,
  policy: PersistPolicy,
  _key: PhantomData<fn(K)>,
}

impl<K: ResourceId> SessionPersistence<K> {
  pub fn new(storage: Arc<dyn SessionStorage>) -> Self {
    Self {
      storage,
      policy: PersistPolicy::PerResource,
      _key: PhantomData,
    }
  }

  pub fn with_policy(mut self, policy: PersistPolicy) -> Self {
    self.policy = policy;
    self
  }

  fn storage_key(key: &K) -> String {
    format!("{}{}", KEY_PREFIX, key.storage_name())
  }

  fn mode_for(&self, key: &K) -> PersistMode {
    match self.policy {
      PersistPolicy::PerResource => key.persist_mode(),
      PersistPolicy::Uniform(mode) => mode,
    }
  }

  /// Write-through of a freshly written entry.
  pub fn write_metadata(&self, key: &K, entry: &CacheEntry<Value>) {
    let persisted = match self.mode_for(key) {
      PersistMode::Full => PersistedEntry::Full {
        data: entry.data.clone(),
        timestamp: entry.timestamp,
        version: entry.version,
      },
      PersistMode::Summary => PersistedEntry::Summary {
        timestamp: entry.timestamp,
        version: entry.version,
        data_size: entry.data_size(),
      },
    };

    let serialized = match serde_json::to_string(&persisted) {
      Ok(s) => s,
      Err(e) => {
        warn!(resource = %key.storage_name(), error = %e, "failed to serialize cache entry");
        return;
      }
    };

    if let Err(e) = self.storage.set(&Self::storage_key(key), &serialized) {
      warn!(resource = %key.storage_name(), error = %e, "failed to persist cache entry");
    }
  }

  /// Read what was persisted for `key`. Never fails: missing, unparsable and
  /// unreadable entries all come back as `None`.
  pub fn read_metadata(&self, key: &K) -> Option<PersistedEntry> {
    let raw = match self.storage.get(&Self::storage_key(key)) {
      Ok(raw) => raw?,
      Err(e) => {
        warn!(resource = %key.storage_name(), error = %e, "failed to read persisted cache entry");
        return None;
      }
    };

    match serde_json::from_str(&raw) {
      Ok(entry) => Some(entry),
      Err(e) => {
        debug!(resource = %key.storage_name(), error = %e, "discarding unparsable cache entry");
        None
      }
    }
  }

  /// Every resource that currently has something persisted.
  pub fn persisted_keys(&self) -> Vec<K> {
    match self.storage.keys() {
      Ok(keys) => keys
        .iter()
        .filter_map(|k| k.strip_prefix(KEY_PREFIX))
        .filter_map(K::from_storage_name)
        .collect(),
      Err(e) => {
        warn!(error = %e, "failed to list persisted cache entries");
        Vec::new()
      }
    }
  }

  /// Remove one resource, or every key under the cache prefix.
  pub fn clear(&self, key: Option<&K>) {
    let targets = match key {
      Some(k) => vec![Self::storage_key(k)],
      None => match self.storage.keys() {
        Ok(keys) => keys
          .into_iter()
          .filter(|k| k.starts_with(KEY_PREFIX))
          .collect(),
        Err(e) => {
          warn!(error = %e, "failed to list persisted cache entries for clearing");
          return;
        }
      },
    };

    for target in targets {
      if let Err(e) = self.storage.remove(&target) {
        warn!(key = %target, error = %e, "failed to remove persisted cache entry");
      }
    }
  }
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;
  use crate::cache::error::StorageError;
  use crate::cache::shape::Shape;
  use crate::cache::storage::{MemorySessionStorage, StorageResult};
  use serde_json::json;

  #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
  pub enum TestKey {
    Big,
    Small,
    Pair,
  }

  impl ResourceId for TestKey {
    fn storage_name(&self) -> String {
      match self {
        Self::Big => "big".into(),
        Self::Small => "small".into(),
        Self::Pair => "pair".into(),
      }
    }

    fn from_storage_name(name: &str) -> Option<Self> {
      match name {
        "big" => Some(Self::Big),
        "small" => Some(Self::Small),
        "pair" => Some(Self::Pair),
        _ => None,
      }
    }

    fn shape(&self) -> Shape {
      match self {
        Self::Pair => Shape::Group {
          parts: &["a", "b"],
          named: &[],
        },
        _ => Shape::Array { named: &["items"] },
      }
    }

    fn persist_mode(&self) -> PersistMode {
      match self {
        Self::Big => PersistMode::Summary,
        Self::Small | Self::Pair => PersistMode::Full,
      }
    }
  }

  /// Storage whose every operation fails.
  pub struct BrokenStorage;

  impl SessionStorage for BrokenStorage {
    fn get(&self, _key: &str) -> StorageResult<Option<String>> {
      Err(StorageError::Unavailable("disabled".into()))
    }

    fn set(&self, _key: &str, _value: &str) -> StorageResult<()> {
      Err(StorageError::QuotaExceeded)
    }

    fn remove(&self, _key: &str) -> StorageResult<()> {
      Err(StorageError::Unavailable("disabled".into()))
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
      Err(StorageError::Unavailable("disabled".into()))
    }
  }

  fn entry() -> CacheEntry<Value> {
    CacheEntry::new(json!([1, 2, 3]), 1_000)
  }

  #[test]
  fn test_summary_and_full_modes() {
    let storage = Arc::new(MemorySessionStorage::new());
    let persistence = SessionPersistence::<TestKey>::new(storage.clone());

    persistence.write_metadata(&TestKey::Big, &entry());
    persistence.write_metadata(&TestKey::Small, &entry());

    let raw: Value =
      serde_json::from_str(&storage.get("etribe.cache.big").unwrap().unwrap()).unwrap();
    assert_eq!(raw, json!({"timestamp": 1000, "version": 1, "dataSize": 3}));

    assert_eq!(
      persistence.read_metadata(&TestKey::Big),
      Some(PersistedEntry::Summary {
        timestamp: 1_000,
        version: 1,
        data_size: 3
      })
    );
    assert_eq!(
      persistence
        .read_metadata(&TestKey::Small)
        .and_then(PersistedEntry::into_entry),
      Some(entry())
    );
  }

  #[test]
  fn test_uniform_full_policy() {
    let storage = Arc::new(MemorySessionStorage::new());
    let persistence = SessionPersistence::<TestKey>::new(storage)
      .with_policy(PersistPolicy::Uniform(PersistMode::Full));

    persistence.write_metadata(&TestKey::Big, &entry());
    assert!(matches!(
      persistence.read_metadata(&TestKey::Big),
      Some(PersistedEntry::Full { .. })
    ));
  }

  #[test]
  fn test_unparsable_entry_reads_as_none() {
    let storage = Arc::new(MemorySessionStorage::new());
    storage.set("etribe.cache.small", "{not json").unwrap();
    let persistence = SessionPersistence::<TestKey>::new(storage);
    assert_eq!(persistence.read_metadata(&TestKey::Small), None);
  }

  #[test]
  fn test_clear_all_leaves_foreign_keys() {
    let storage = Arc::new(MemorySessionStorage::new());
    storage.set("etribe.prefs.theme", "dark").unwrap();
    let persistence = SessionPersistence::<TestKey>::new(storage.clone());
    persistence.write_metadata(&TestKey::Big, &entry());
    persistence.write_metadata(&TestKey::Small, &entry());
    assert_eq!(persistence.persisted_keys().len(), 2);

    persistence.clear(Some(&TestKey::Big));
    assert_eq!(persistence.persisted_keys(), vec![TestKey::Small]);

    persistence.clear(None);
    assert!(persistence.persisted_keys().is_empty());
    assert_eq!(
      storage.get("etribe.prefs.theme").unwrap().as_deref(),
      Some("dark")
    );
  }

  #[test]
  fn test_broken_storage_never_panics() {
    let persistence = SessionPersistence::<TestKey>::new(Arc::new(BrokenStorage));
    persistence.write_metadata(&TestKey::Small, &entry());
    assert_eq!(persistence.read_metadata(&TestKey::Small), None);
    assert!(persistence.persisted_keys().is_empty());
    persistence.clear(None);
    persistence.clear(Some(&TestKey::Big));
  }
}
