//! In-memory resource cache store.

use chrono::Duration;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, trace};

use super::clock::Clock;
use super::persistence::{PersistedEntry, SessionPersistence};
use super::shape;
use super::traits::{CacheEntry, ResourceId};

/// Default freshness window for every resource, in hours.
pub const DEFAULT_TTL_HOURS: i64 = 24;

/// Holds the last-known-good value of every resource and decides whether it
/// may be served without a refetch.
///
/// Entries are only ever replaced wholesale or removed. Staleness never
/// removes an entry; it only makes the next read fetch first.
pub struct ResourceCacheStore<K: ResourceId> {
  entries: RwLock<HashMap<K, CacheEntry<Value>>>,
  persistence: SessionPersistence<K>,
  clock: Arc<dyn Clock>,
  ttl: Duration,
}

impl<K: ResourceId> ResourceCacheStore<K> {
  /// Create a store and restore any fully persisted entries.
  pub fn new(persistence: SessionPersistence<K>, clock: Arc<dyn Clock>) -> Self {
    let store = Self {
      entries: RwLock::new(HashMap::new()),
      persistence,
      clock,
      ttl: Duration::hours(DEFAULT_TTL_HOURS),
    };
    store.bootstrap();
    store
  }

  /// Set the freshness window.
  pub fn with_ttl(mut self, ttl: Duration) -> Self {
    self.ttl = ttl;
    self
  }

  pub fn ttl(&self) -> Duration {
    self.ttl
  }

  pub fn now_ms(&self) -> i64 {
    self.clock.now_ms()
  }

  fn bootstrap(&self) {
    let mut restored = 0;
    for key in self.persistence.persisted_keys() {
      if let Some(entry) = self
        .persistence
        .read_metadata(&key)
        .and_then(PersistedEntry::into_entry)
      {
        self.put(key, entry);
        restored += 1;
      }
    }
    if restored > 0 {
      debug!(restored, "restored cache entries from session storage");
    }
  }

  fn put(&self, key: K, entry: CacheEntry<Value>) {
    // A poisoned lock only means a writer panicked mid-insert; the map itself
    // is still a valid map of whole entries.
    let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
    entries.insert(key, entry);
  }

  /// Whether `entry` may be served without refetching.
  pub fn is_fresh(&self, entry: Option<&CacheEntry<Value>>, force: bool) -> bool {
    if force {
      return false;
    }
    match entry {
      Some(entry) => self.clock.now_ms() - entry.timestamp < self.ttl.num_milliseconds(),
      None => false,
    }
  }

  /// Whether `entry` holds data worth serving for `key`'s shape.
  pub fn has_usable_data(&self, key: &K, entry: Option<&CacheEntry<Value>>) -> bool {
    match entry {
      Some(entry) => entry.timestamp > 0 && shape::has_data(key.shape(), &entry.data),
      None => false,
    }
  }

  /// Current entry for `key`, fresh or not.
  pub fn get(&self, key: &K) -> Option<CacheEntry<Value>> {
    let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
    entries.get(key).cloned()
  }

  /// The entry for `key` if it is fresh and usable.
  pub fn get_servable(&self, key: &K) -> Option<CacheEntry<Value>> {
    let entry = self.get(key);
    if self.is_fresh(entry.as_ref(), false) && self.has_usable_data(key, entry.as_ref()) {
      entry
    } else {
      None
    }
  }

  /// Replace the entry for `key` and write it through to session storage.
  pub fn write(&self, key: K, data: Value) -> CacheEntry<Value> {
    let entry = CacheEntry::new(data, self.clock.now_ms());
    self.put(key, entry.clone());
    self.persistence.write_metadata(&key, &entry);
    trace!(resource = %key.storage_name(), size = entry.data_size(), "cache entry written");
    entry
  }

  /// Drop the listed resources, or everything, from memory and session
  /// storage. Does not refetch.
  pub fn invalidate(&self, keys: Option<&[K]>) {
    let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
    match keys {
      Some(keys) => {
        for key in keys {
          entries.remove(key);
          self.persistence.clear(Some(key));
        }
      }
      None => {
        entries.clear();
        self.persistence.clear(None);
      }
    }
    debug!(count = keys.map_or(0, <[K]>::len), all = keys.is_none(), "cache invalidated");
  }

  /// Drop every resource matching `predicate`.
  pub fn invalidate_where(&self, predicate: impl Fn(&K) -> bool) {
    let mut keys: Vec<K> = {
      let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
      entries.keys().filter(|k| predicate(*k)).copied().collect()
    };
    for key in self.persistence.persisted_keys() {
      if predicate(&key) && !keys.contains(&key) {
        keys.push(key);
      }
    }
    if !keys.is_empty() {
      self.invalidate(Some(keys.as_slice()));
    }
  }

  /// Keys currently held in memory.
  pub fn keys(&self) -> Vec<K> {
    let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
    entries.keys().copied().collect()
  }

  /// Persisted metadata for `key`, for diagnostics.
  pub fn persisted(&self, key: &K) -> Option<PersistedEntry> {
    self.persistence.read_metadata(key)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::clock::ManualClock;
  use crate::cache::persistence::tests::{BrokenStorage, TestKey};
  use crate::cache::storage::MemorySessionStorage;
  use serde_json::json;

  const T0: i64 = 1_700_000_000_000;

  fn store_with(
    storage: Arc<dyn crate::cache::storage::SessionStorage>,
  ) -> (ResourceCacheStore<TestKey>, ManualClock) {
    let clock = ManualClock::at(T0);
    let store = ResourceCacheStore::new(SessionPersistence::new(storage), Arc::new(clock.clone()));
    (store, clock)
  }

  #[test]
  fn test_freshness_window_boundaries() {
    let (store, clock) = store_with(Arc::new(MemorySessionStorage::new()));
    store.write(TestKey::Small, json!([1]));
    let ttl = Duration::hours(DEFAULT_TTL_HOURS).num_milliseconds();

    clock.advance_ms(ttl - 1);
    assert!(store.is_fresh(store.get(&TestKey::Small).as_ref(), false));

    clock.advance_ms(2);
    assert!(!store.is_fresh(store.get(&TestKey::Small).as_ref(), false));
    // Stale entries stay put.
    assert!(store.get(&TestKey::Small).is_some());
  }

  #[test]
  fn test_force_is_never_fresh() {
    let (store, _) = store_with(Arc::new(MemorySessionStorage::new()));
    let entry = store.write(TestKey::Small, json!([1]));
    assert!(!store.is_fresh(Some(&entry), true));
    assert!(!store.is_fresh(None, false));
  }

  #[test]
  fn test_empty_list_is_not_usable() {
    let (store, _) = store_with(Arc::new(MemorySessionStorage::new()));
    store.write(TestKey::Small, json!([]));
    assert!(store.is_fresh(store.get(&TestKey::Small).as_ref(), false));
    assert!(!store.has_usable_data(&TestKey::Small, store.get(&TestKey::Small).as_ref()));
    assert!(store.get_servable(&TestKey::Small).is_none());
  }

  #[test]
  fn test_invalidate_listed_and_all() {
    let storage = Arc::new(MemorySessionStorage::new());
    let (store, _) = store_with(storage.clone());
    store.write(TestKey::Small, json!([1]));
    store.write(TestKey::Big, json!([2]));

    store.invalidate(Some(&[TestKey::Small][..]));
    assert!(store.get(&TestKey::Small).is_none());
    assert!(store.persisted(&TestKey::Small).is_none());
    assert!(store.get(&TestKey::Big).is_some());

    store.invalidate(None);
    assert!(store.keys().is_empty());
    assert!(store.persisted(&TestKey::Big).is_none());
  }

  #[test]
  fn test_bootstrap_restores_full_entries_only() {
    let storage = Arc::new(MemorySessionStorage::new());
    {
      let (store, _) = store_with(storage.clone());
      store.write(TestKey::Small, json!([1]));
      store.write(TestKey::Big, json!([2]));
    }

    let (reloaded, _) = store_with(storage);
    assert_eq!(
      reloaded.get(&TestKey::Small).map(|e| e.data),
      Some(json!([1]))
    );
    assert!(reloaded.get(&TestKey::Big).is_none());
    assert!(matches!(
      reloaded.persisted(&TestKey::Big),
      Some(PersistedEntry::Summary { data_size: 1, .. })
    ));
  }

  #[test]
  fn test_broken_storage_keeps_memory_cache_working() {
    let (store, clock) = store_with(Arc::new(BrokenStorage));
    store.write(TestKey::Small, json!([1, 2]));
    assert_eq!(
      store.get_servable(&TestKey::Small).map(|e| e.data),
      Some(json!([1, 2]))
    );

    clock.advance_ms(Duration::hours(DEFAULT_TTL_HOURS).num_milliseconds() + 1);
    assert!(store.get_servable(&TestKey::Small).is_none());

    store.invalidate(None);
    assert!(store.get(&TestKey::Small).is_none());
  }

  #[test]
  fn test_invalidate_where() {
    let (store, _) = store_with(Arc::new(MemorySessionStorage::new()));
    store.write(TestKey::Small, json!([1]));
    store.write(TestKey::Big, json!([2]));
    store.invalidate_where(|k| *k == TestKey::Big);
    assert_eq!(store.keys(), vec![TestKey::Small]);
  }
}
