//! Cached ETribe client that wraps a transport with transparent caching.

use futures::future::{join_all, FutureExt};
use reqwest::Method;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

use crate::cache::{
  CacheResult, FetchCoordinator, FetchError, ResourceId, ResourceState, ResourceView,
};

use super::client::Transport;
use super::resources::{ResourceKey, MEMBER_PARTS};
use super::types::{
  decode_object, decode_rows, Contact, Event, GroupRecord, MemberCounts, MemberGroup,
  PermissionRecord, ProfileSettings,
};

/// ETribe client with transparent caching support.
///
/// Reads go through the fetch coordinator; mutations go straight to the API
/// and then force-refresh the affected resource.
#[derive(Clone)]
pub struct EtribeClient {
  transport: Arc<dyn Transport>,
  cache: FetchCoordinator<ResourceKey>,
}

impl EtribeClient {
  pub fn new(transport: Arc<dyn Transport>, cache: FetchCoordinator<ResourceKey>) -> Self {
    Self { transport, cache }
  }

  pub fn cache(&self) -> &FetchCoordinator<ResourceKey> {
    &self.cache
  }

  pub fn transport(&self) -> &Arc<dyn Transport> {
    &self.transport
  }

  /// Fetch any resource as its canonical JSON payload.
  pub async fn fetch(&self, key: ResourceKey, force: bool) -> Result<CacheResult<Value>, FetchError> {
    match key {
      ResourceKey::Members => {
        let parts = MEMBER_PARTS
          .iter()
          .map(|part| {
            let transport = Arc::clone(&self.transport);
            let path = ResourceKey::member_part_path(part);
            (*part, move || transport.get(&path))
          })
          .collect();
        self.cache.fetch_group(key, parts, force).await
      }
      _ => {
        let transport = Arc::clone(&self.transport);
        self
          .cache
          .fetch_resource(key, move || transport.get(&key.path()), force)
          .await
      }
    }
  }

  /// Active, inactive and expired members from one consistent fetch.
  pub async fn members(&self, force: bool) -> Result<MemberGroup, FetchError> {
    let result = self.fetch(ResourceKey::Members, force).await?;
    Ok(MemberGroup::from_value(&result.data))
  }

  /// Dashboard member statistics.
  pub async fn member_counts(&self, force: bool) -> Result<MemberCounts, FetchError> {
    Ok(self.members(force).await?.counts())
  }

  pub async fn future_events(&self, force: bool) -> Result<Vec<Event>, FetchError> {
    let result = self.fetch(ResourceKey::EventsFuture, force).await?;
    Ok(decode_rows(&result.data))
  }

  pub async fn past_events(&self, force: bool) -> Result<Vec<Event>, FetchError> {
    let result = self.fetch(ResourceKey::EventsPast, force).await?;
    Ok(decode_rows(&result.data))
  }

  pub async fn contacts(&self, force: bool) -> Result<Vec<Contact>, FetchError> {
    let result = self.fetch(ResourceKey::Contacts, force).await?;
    Ok(decode_rows(&result.data))
  }

  pub async fn group_data(&self, force: bool) -> Result<Vec<GroupRecord>, FetchError> {
    let result = self.fetch(ResourceKey::GroupData, force).await?;
    Ok(decode_rows(&result.data))
  }

  pub async fn profile_settings(&self, force: bool) -> Result<ProfileSettings, FetchError> {
    let result = self.fetch(ResourceKey::ProfileSettings, force).await?;
    Ok(decode_object(&result.data))
  }

  /// Permission records of `role_id`.
  pub async fn permissions(
    &self,
    role_id: u32,
    force: bool,
  ) -> Result<Vec<PermissionRecord>, FetchError> {
    let result = self
      .fetch(ResourceKey::Permissions { role_id }, force)
      .await?;
    Ok(decode_rows(&result.data))
  }

  /// Create a contact (not cached - write operation), then refresh contacts.
  pub async fn add_contact(&self, contact: Value) -> Result<Vec<Contact>, FetchError> {
    self
      .transport
      .request(Method::POST, &ResourceKey::Contacts.path(), Some(contact))
      .await?;
    self.contacts(true).await
  }

  /// Update a contact, then refresh contacts.
  pub async fn update_contact(&self, id: &str, contact: Value) -> Result<Vec<Contact>, FetchError> {
    let path = format!("{}/{}", ResourceKey::Contacts.path(), id);
    self
      .transport
      .request(Method::PUT, &path, Some(contact))
      .await?;
    self.contacts(true).await
  }

  /// Delete a contact, then refresh contacts.
  pub async fn delete_contact(&self, id: &str) -> Result<Vec<Contact>, FetchError> {
    let path = format!("{}/{}", ResourceKey::Contacts.path(), id);
    self.transport.request(Method::DELETE, &path, None).await?;
    self.contacts(true).await
  }

  /// Fetch every resource concurrently, as done right after login.
  ///
  /// Failures are reported per resource; one failing resource does not stop
  /// the others.
  pub async fn prefetch_all(
    &self,
    role_id: Option<u32>,
  ) -> Vec<(ResourceKey, Result<(), FetchError>)> {
    let mut keys = ResourceKey::SHARED.to_vec();
    if let Some(role_id) = role_id {
      keys.push(ResourceKey::Permissions { role_id });
    }

    let results = join_all(keys.iter().map(|key| {
      let client = self.clone();
      let key = *key;
      async move { (key, client.fetch(key, false).await.map(|_| ())) }
    }))
    .await;

    let loaded = results.iter().filter(|(_, r)| r.is_ok()).count();
    info!(loaded, total = results.len(), "prefetch complete");
    results
  }

  /// Consumer handle on one resource: current state plus refresh operations.
  pub fn use_resource(&self, key: ResourceKey) -> ResourceView<Value> {
    let status = self.cache.status(&key);
    let cached = self.cache.cached(&key);
    let initial = ResourceState {
      cached_at: cached.as_ref().map(|e| e.timestamp),
      data: cached.map(|e| e.data),
      loading: status.loading,
      error: status.error,
    };

    let client = self.clone();
    debug!(resource = %key.storage_name(), "resource view created");
    ResourceView::new(key.storage_name(), initial, move |force| {
      let client = client.clone();
      async move { client.fetch(key, force).await }.boxed()
    })
  }
}
