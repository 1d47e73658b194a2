//! Core traits and types for the caching system.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Debug;
use std::hash::Hash;

use super::shape::Shape;

/// Schema version written into every entry.
pub const CACHE_VERSION: u32 = 1;

/// Identifier of one independently cached resource.
///
/// A resource family (e.g. the ETribe dashboard resources) implements this
/// for its key enum; the store, coordinator and persistence adapter are all
/// generic over it.
pub trait ResourceId: Copy + Eq + Hash + Debug + Send + Sync + 'static {
  /// Stable name used for logging and as the session storage suffix
  /// (e.g. "contacts", "members", "permissions.3").
  fn storage_name(&self) -> String;

  /// Inverse of `storage_name`, used when bootstrapping from storage.
  fn from_storage_name(name: &str) -> Option<Self>;

  /// Shape of the canonical payload.
  fn shape(&self) -> Shape;

  /// How much of an entry is mirrored into session storage.
  fn persist_mode(&self) -> PersistMode;
}

/// What the persistence adapter writes for a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PersistMode {
  /// `{timestamp, version, dataSize}` only
  Summary,
  /// `{data, timestamp, version}`
  Full,
}

/// A cached payload with its write time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
  pub data: T,
  /// Epoch milliseconds at last successful write
  pub timestamp: i64,
  pub version: u32,
}

impl<T> CacheEntry<T> {
  pub fn new(data: T, timestamp: i64) -> Self {
    Self {
      data,
      timestamp,
      version: CACHE_VERSION,
    }
  }
}

impl CacheEntry<Value> {
  /// Number of top-level records in the payload, used for summaries.
  pub fn data_size(&self) -> usize {
    data_size(&self.data)
  }
}

/// Count records in a canonical payload. Groups count the sum of their parts.
pub fn data_size(value: &Value) -> usize {
  match value {
    Value::Array(items) => items.len(),
    Value::Object(map) if map.values().all(Value::is_array) && !map.is_empty() => {
      map.values().filter_map(Value::as_array).map(Vec::len).sum()
    }
    Value::Object(map) => map.len(),
    Value::Null => 0,
    _ => 1,
  }
}

/// Result from a cache read, including where the data came from.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was written (epoch ms)
  pub cached_at: i64,
}

/// Indicates where returned data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from memory, still within the freshness window
  CacheFresh,
  /// A concurrent fetch for the same resource was joined
  Shared,
}
