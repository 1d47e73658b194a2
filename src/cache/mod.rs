//! Generic resource cache.
//!
//! This module provides a backend-agnostic caching mechanism that:
//! - Serves resources from memory while they are fresh and non-empty
//! - Collapses concurrent fetches of the same resource into one request
//! - Normalizes inconsistent response envelopes into canonical payloads
//! - Mirrors entries into session storage for same-session restarts

mod clock;
mod error;
mod layer;
mod persistence;
mod shape;
mod storage;
mod store;
mod traits;
mod view;

pub use clock::SystemClock;
pub use error::FetchError;
pub use layer::FetchCoordinator;
pub use persistence::{PersistPolicy, SessionPersistence};
pub use shape::Shape;
pub use storage::{
  session_namespace, MemorySessionStorage, NoopStorage, SessionStorage, SqliteSessionStorage,
};
pub use store::{ResourceCacheStore, DEFAULT_TTL_HOURS};
pub use traits::{CacheResult, PersistMode, ResourceId};
pub use view::{ResourceState, ResourceView};

#[cfg(test)]
pub use clock::ManualClock;
#[cfg(test)]
pub use traits::CacheSource;
