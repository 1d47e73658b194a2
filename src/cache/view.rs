//! Consumer-facing handle on one cached resource.

use futures::future::BoxFuture;
use std::sync::{Arc, Mutex, Weak};
use tokio::task::JoinHandle;
use tracing::trace;

use super::error::FetchError;
use super::traits::CacheResult;

/// Snapshot of what a consumer should render for a resource.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceState<T> {
  /// Last successfully loaded data. Kept when a later refresh fails.
  pub data: Option<T>,
  pub loading: bool,
  pub error: Option<FetchError>,
  /// Write time of `data` (epoch ms)
  pub cached_at: Option<i64>,
}

impl<T> Default for ResourceState<T> {
  fn default() -> Self {
    Self {
      data: None,
      loading: false,
      error: None,
      cached_at: None,
    }
  }
}

type Loader<T> =
  Arc<dyn Fn(bool) -> BoxFuture<'static, Result<CacheResult<T>, FetchError>> + Send + Sync>;

/// A resource bound to its loader, with local loading/error state.
///
/// Background refreshes hold only a weak reference to the state: once the
/// view is dropped, late responses are ignored.
pub struct ResourceView<T> {
  name: String,
  state: Arc<Mutex<ResourceState<T>>>,
  loader: Loader<T>,
}

impl<T: Clone + Send + 'static> ResourceView<T> {
  pub fn new<F>(name: impl Into<String>, initial: ResourceState<T>, loader: F) -> Self
  where
    F: Fn(bool) -> BoxFuture<'static, Result<CacheResult<T>, FetchError>> + Send + Sync + 'static,
  {
    Self {
      name: name.into(),
      state: Arc::new(Mutex::new(initial)),
      loader: Arc::new(loader),
    }
  }

  /// Current snapshot.
  pub fn state(&self) -> ResourceState<T> {
    self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
  }

  /// Load through the cache, fetching only if needed.
  pub async fn refresh(&self) -> ResourceState<T> {
    self.load(false).await
  }

  /// Load from the network regardless of freshness.
  pub async fn refresh_force(&self) -> ResourceState<T> {
    self.load(true).await
  }

  async fn load(&self, force: bool) -> ResourceState<T> {
    set_loading(&self.state);
    let result = (self.loader)(force).await;
    apply(&self.state, result);
    self.state()
  }

  /// Refresh in the background. The task never touches the state of a view
  /// that has been dropped in the meantime.
  pub fn spawn_refresh(&self, force: bool) -> JoinHandle<()> {
    set_loading(&self.state);
    let weak: Weak<Mutex<ResourceState<T>>> = Arc::downgrade(&self.state);
    let request = (self.loader)(force);
    let name = self.name.clone();

    tokio::spawn(async move {
      let result = request.await;
      match weak.upgrade() {
        Some(state) => apply(&state, result),
        None => trace!(resource = %name, "view dropped, ignoring late response"),
      }
    })
  }
}

fn set_loading<T>(state: &Mutex<ResourceState<T>>) {
  state.lock().unwrap_or_else(|e| e.into_inner()).loading = true;
}

fn apply<T>(state: &Mutex<ResourceState<T>>, result: Result<CacheResult<T>, FetchError>) {
  let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
  state.loading = false;
  match result {
    Ok(loaded) => {
      state.data = Some(loaded.data);
      state.cached_at = Some(loaded.cached_at);
      state.error = None;
    }
    Err(e) => state.error = Some(e),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::traits::CacheSource;
  use futures::FutureExt;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::time::Duration;

  fn loaded(n: usize) -> Result<CacheResult<usize>, FetchError> {
    Ok(CacheResult {
      data: n,
      source: CacheSource::Network,
      cached_at: n as i64,
    })
  }

  #[tokio::test]
  async fn test_refresh_updates_state() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let view = ResourceView::new("n", ResourceState::default(), move |_force| {
      let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
      async move { loaded(n) }.boxed()
    });

    assert_eq!(view.state(), ResourceState::default());
    let state = view.refresh().await;
    assert_eq!(state.data, Some(1));
    assert!(!state.loading);
    assert_eq!(view.refresh_force().await.data, Some(2));
  }

  #[tokio::test]
  async fn test_failed_refresh_keeps_stale_data() {
    let fail = Arc::new(AtomicUsize::new(0));
    let flag = Arc::clone(&fail);
    let view = ResourceView::new("n", ResourceState::default(), move |_| {
      let failing = flag.load(Ordering::SeqCst) > 0;
      async move {
        if failing {
          Err(FetchError::ServerError(500))
        } else {
          loaded(5)
        }
      }
      .boxed()
    });

    view.refresh().await;
    fail.store(1, Ordering::SeqCst);
    let state = view.refresh().await;
    assert_eq!(state.data, Some(5));
    assert_eq!(state.error, Some(FetchError::ServerError(500)));
  }

  #[tokio::test]
  async fn test_dropped_view_ignores_late_response() {
    let view = ResourceView::new("n", ResourceState::default(), |_| {
      async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        loaded(1)
      }
      .boxed()
    });

    let handle = view.spawn_refresh(false);
    assert!(view.state().loading);
    let weak = Arc::downgrade(&view.state);
    drop(view);

    handle.await.unwrap();
    assert!(weak.upgrade().is_none());
  }

  #[tokio::test]
  async fn test_background_refresh_applies() {
    let view = ResourceView::new("n", ResourceState::default(), |_| {
      async { loaded(3) }.boxed()
    });
    view.spawn_refresh(true).await.unwrap();
    assert_eq!(view.state().data, Some(3));
  }
}
