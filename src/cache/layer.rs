//! Fetch coordinator that orchestrates caching logic with network fetching.

use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, trace, warn};

use super::error::FetchError;
use super::shape;
use super::store::ResourceCacheStore;
use super::traits::{CacheEntry, CacheResult, CacheSource, ResourceId};
use crate::event::{EventBus, Notification, SessionEvent};

/// Default network timeout for a single resource fetch.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

type SharedFetch = Shared<BoxFuture<'static, Result<CacheEntry<Value>, FetchError>>>;

struct InFlight {
  generation: u64,
  fetch: SharedFetch,
}

/// Loading and error flags of one resource.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceStatus {
  pub loading: bool,
  /// Error of the most recent completed fetch, cleared by a success
  pub error: Option<FetchError>,
}

struct Inner<K: ResourceId> {
  store: ResourceCacheStore<K>,
  bus: EventBus,
  timeout: Duration,
  in_flight: Mutex<HashMap<K, InFlight>>,
  status: Mutex<HashMap<K, ResourceStatus>>,
  generation: AtomicU64,
  /// Bumped on every full clear so fetches started before a logout cannot
  /// write their results back afterwards.
  epoch: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Performs network retrieval for a resource exactly when needed.
///
/// Reads are served from the store while fresh and usable. Otherwise the
/// injected transport runs under a timeout, its body is normalized and
/// written through. At most one non-forced fetch per resource is in flight;
/// concurrent callers share its result.
pub struct FetchCoordinator<K: ResourceId> {
  inner: Arc<Inner<K>>,
}

impl<K: ResourceId> FetchCoordinator<K> {
  pub fn new(store: ResourceCacheStore<K>, bus: EventBus) -> Self {
    Self {
      inner: Arc::new(Inner {
        store,
        bus,
        timeout: DEFAULT_TIMEOUT,
        in_flight: Mutex::new(HashMap::new()),
        status: Mutex::new(HashMap::new()),
        generation: AtomicU64::new(0),
        epoch: AtomicU64::new(0),
      }),
    }
  }

  /// Set the network timeout. Only valid before the coordinator is cloned.
  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    if let Some(inner) = Arc::get_mut(&mut self.inner) {
      inner.timeout = timeout;
    }
    self
  }

  pub fn store(&self) -> &ResourceCacheStore<K> {
    &self.inner.store
  }

  pub fn bus(&self) -> &EventBus {
    &self.inner.bus
  }

  /// Fetch a resource with cache-first strategy.
  ///
  /// 1. Unless forced, a fresh and usable entry is returned immediately
  /// 2. Unless forced, an in-flight fetch for the same key is joined
  /// 3. Otherwise the transport runs and its normalized result is cached
  ///
  /// On failure the existing entry is left untouched.
  pub async fn fetch_resource<F, Fut>(
    &self,
    key: K,
    transport: F,
    force: bool,
  ) -> Result<CacheResult<Value>, FetchError>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Value, FetchError>> + Send + 'static,
  {
    if let Some(hit) = self.cached_hit(&key, force) {
      return Ok(hit);
    }

    let (fetch, source) = {
      let mut in_flight = lock(&self.inner.in_flight);

      // Re-check under the lock: a fetch may have completed in between.
      if let Some(hit) = self.cached_hit(&key, force) {
        return Ok(hit);
      }

      match in_flight.get(&key) {
        Some(existing) if !force => {
          trace!(resource = %key.storage_name(), "joining in-flight fetch");
          (existing.fetch.clone(), CacheSource::Shared)
        }
        _ => {
          let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst);
          let fetch = self.start(key, generation, transport());
          in_flight.insert(
            key,
            InFlight {
              generation,
              fetch: fetch.clone(),
            },
          );
          (fetch, CacheSource::Network)
        }
      }
    };

    let entry = fetch.await?;
    Ok(CacheResult {
      data: entry.data,
      source,
      cached_at: entry.timestamp,
    })
  }

  /// Fetch a compound resource whose parts must stay consistent.
  ///
  /// Parts are only requested when the group is not served from cache. All
  /// of them run concurrently and are written as one entry; if any part
  /// fails, nothing is written.
  pub async fn fetch_group<F, Fut>(
    &self,
    key: K,
    parts: Vec<(&'static str, F)>,
    force: bool,
  ) -> Result<CacheResult<Value>, FetchError>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Value, FetchError>> + Send + 'static,
  {
    self
      .fetch_resource(
        key,
        move || {
          let (names, requests): (Vec<_>, Vec<_>) = parts
            .into_iter()
            .map(|(name, request)| (name, request()))
            .unzip();
          async move {
            let bodies = futures::future::try_join_all(requests).await?;
            let group: Map<String, Value> = names
              .into_iter()
              .map(String::from)
              .zip(bodies)
              .collect();
            Ok(Value::Object(group))
          }
        },
        force,
      )
      .await
  }

  fn cached_hit(&self, key: &K, force: bool) -> Option<CacheResult<Value>> {
    if force {
      return None;
    }
    let entry = self.inner.store.get_servable(key)?;
    trace!(resource = %key.storage_name(), "serving from cache");
    Some(CacheResult {
      data: entry.data,
      source: CacheSource::CacheFresh,
      cached_at: entry.timestamp,
    })
  }

  fn start<Fut>(&self, key: K, generation: u64, request: Fut) -> SharedFetch
  where
    Fut: Future<Output = Result<Value, FetchError>> + Send + 'static,
  {
    self.update_status(&key, |status| status.loading = true);
    debug!(resource = %key.storage_name(), generation, "fetching");

    let inner = Arc::clone(&self.inner);
    let epoch = inner.epoch.load(Ordering::SeqCst);

    let fetch = async move {
      let outcome = match tokio::time::timeout(inner.timeout, request).await {
        Ok(outcome) => outcome,
        Err(_) => Err(FetchError::Timeout),
      };

      let result = outcome.map(|raw| {
        let (data, rule) = shape::normalize(key.shape(), &raw);
        trace!(resource = %key.storage_name(), ?rule, "normalized response");
        inner.write_current(key, data, epoch)
      });

      if inner.epoch.load(Ordering::SeqCst) == epoch {
        inner.finish(key, generation, &result);
      } else {
        debug!(resource = %key.storage_name(), "fetch outlived a cache clear");
      }
      result
    }
    .boxed()
    .shared();

    // Drive the fetch even if every caller goes away before it completes.
    tokio::spawn(fetch.clone());
    fetch
  }

  fn update_status(&self, key: &K, f: impl FnOnce(&mut ResourceStatus)) {
    self.inner.update_status(key, f);
  }

  /// Loading and error flags for `key`.
  pub fn status(&self, key: &K) -> ResourceStatus {
    lock(&self.inner.status).get(key).cloned().unwrap_or_default()
  }

  /// Last-known entry regardless of freshness, for "stale but present" display.
  pub fn cached(&self, key: &K) -> Option<CacheEntry<Value>> {
    self.inner.store.get(key)
  }

  /// Invalidate listed resources (or all) without refetching.
  pub fn invalidate(&self, keys: Option<&[K]>) {
    match keys {
      Some(keys) => {
        self.inner.store.invalidate(Some(keys));
        let mut status = lock(&self.inner.status);
        for key in keys {
          status.remove(key);
        }
      }
      None => self.inner.clear_all(),
    }
  }

  /// Number of fetches currently in flight.
  pub fn in_flight_count(&self) -> usize {
    lock(&self.inner.in_flight).len()
  }
}

impl<K: ResourceId> Inner<K> {
  fn update_status(&self, key: &K, f: impl FnOnce(&mut ResourceStatus)) {
    let mut status = lock(&self.status);
    f(status.entry(*key).or_default());
  }

  /// Write `data` unless the cache was cleared since the fetch started. The
  /// check and the write happen under the in-flight lock, which
  /// `clear_all` also holds.
  fn write_current(&self, key: K, data: Value, epoch: u64) -> CacheEntry<Value> {
    let _in_flight = lock(&self.in_flight);
    if self.epoch.load(Ordering::SeqCst) == epoch {
      self.store.write(key, data)
    } else {
      debug!(resource = %key.storage_name(), "discarding result fetched before cache clear");
      CacheEntry::new(data, self.store.now_ms())
    }
  }

  fn finish(&self, key: K, generation: u64, result: &Result<CacheEntry<Value>, FetchError>) {
    let latest = {
      let mut in_flight = lock(&self.in_flight);
      match in_flight.get(&key) {
        Some(current) if current.generation == generation => {
          in_flight.remove(&key);
          true
        }
        _ => false,
      }
    };

    match result {
      Ok(entry) => {
        debug!(resource = %key.storage_name(), size = entry.data_size(), "fetch complete");
        self.update_status(&key, |status| {
          status.error = None;
          if latest {
            status.loading = false;
          }
        });
      }
      Err(e) => {
        warn!(resource = %key.storage_name(), error = %e, "fetch failed");
        self.update_status(&key, |status| {
          status.error = Some(e.clone());
          if latest {
            status.loading = false;
          }
        });
        self
          .bus
          .notify(Notification::error(key.storage_name(), e.user_message()));

        if e.ends_session() {
          warn!("session rejected by server, logging out");
          self.clear_all();
          self.bus.publish(SessionEvent::Logout);
        }
      }
    }
  }

  /// Drop every entry and forget in-flight fetches, so nothing started
  /// before the clear can be joined or written afterwards.
  fn clear_all(&self) {
    let mut in_flight = lock(&self.in_flight);
    self.epoch.fetch_add(1, Ordering::SeqCst);
    in_flight.clear();
    self.store.invalidate(None);
    lock(&self.status).clear();
  }
}

impl<K: ResourceId> Clone for FetchCoordinator<K> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}
