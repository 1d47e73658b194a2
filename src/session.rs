//! Session lifecycle: login/logout wiring between the event bus, the cache
//! and the permission gate.

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::etribe::EtribeClient;
use crate::event::{EventBus, Notification, SessionEvent};
use crate::permissions::PermissionGate;

#[derive(Clone)]
pub struct SessionController {
  client: EtribeClient,
  gate: PermissionGate,
  bus: EventBus,
}

impl SessionController {
  pub fn new(client: EtribeClient, gate: PermissionGate) -> Self {
    let bus = client.cache().bus().clone();
    Self { client, gate, bus }
  }

  pub fn gate(&self) -> &PermissionGate {
    &self.gate
  }

  pub fn client(&self) -> &EtribeClient {
    &self.client
  }

  /// Start a session: install the token, bind the role and announce it.
  pub fn login(&self, token: String, role_id: Option<u32>) {
    self.client.transport().set_token(Some(token));
    if let Some(role_id) = role_id {
      self.gate.init(role_id);
    }
    info!(?role_id, "logged in");
    self.bus.publish(SessionEvent::Login);
  }

  /// End the session. Caches are gone before anyone hears about it.
  pub fn logout(&self) {
    self.clear();
    self.bus.publish(SessionEvent::Logout);
  }

  fn clear(&self) {
    self.client.cache().invalidate(None);
    self.gate.reset();
    self.client.transport().set_token(None);
    debug!("session state cleared");
  }

  /// Eager loading after login: every resource plus the permission set.
  pub async fn on_login(&self) {
    let role_id = self.gate.role_id();
    let results = self.client.prefetch_all(role_id).await;
    let failed = results.iter().filter(|(_, r)| r.is_err()).count();
    if let Err(e) = self.gate.load(false).await {
      warn!(error = %e, "permissions unavailable after login");
    }
    self.bus.notify(Notification::info(format!(
      "Loaded {} of {} resources",
      results.len() - failed,
      results.len()
    )));
  }

  /// React to session events published anywhere in the process, including
  /// the logout forced by a rejected token.
  pub fn spawn_listener(&self) -> JoinHandle<()> {
    let controller = self.clone();
    let mut events = self.bus.subscribe();
    tokio::spawn(async move {
      loop {
        match events.recv().await {
          Ok(SessionEvent::Login) => controller.on_login().await,
          Ok(SessionEvent::Logout) => controller.clear(),
          Err(RecvError::Lagged(skipped)) => {
            warn!(skipped, "session listener lagged");
          }
          Err(RecvError::Closed) => break,
        }
      }
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{FetchError, MemorySessionStorage, SessionStorage};
  use crate::etribe::cached_client::tests::client_with;
  use crate::etribe::client::tests::FakeTransport;
  use crate::etribe::ResourceKey;
  use crate::event::NotificationLevel;
  use crate::permissions::{Action, PermissionState};
  use serde_json::json;
  use std::sync::Arc;

  fn seeded() -> Arc<FakeTransport> {
    let transport = FakeTransport::new();
    transport.respond("member/active", Ok(json!([{"id": 1}])));
    transport.respond("contact", Ok(json!({"contacts": [{"id": 1}]})));
    transport.respond("profile", Ok(json!({"name": "Tribe"})));
    transport.respond(
      "rolePermission/2",
      Ok(json!([{"moduleId": 4, "canView": true}])),
    );
    transport
  }

  fn controller(
    transport: Arc<FakeTransport>,
  ) -> (SessionController, Arc<MemorySessionStorage>) {
    let storage = Arc::new(MemorySessionStorage::new());
    let (client, _) = client_with(transport, storage.clone());
    let gate = PermissionGate::new(client.clone());
    (SessionController::new(client, gate), storage)
  }

  #[tokio::test]
  async fn test_login_prefetches_everything() {
    let transport = seeded();
    let (session, _) = controller(transport.clone());
    let mut notes = session.bus.notifications();

    session.login("secret".into(), Some(2));
    assert_eq!(transport.token.lock().unwrap().as_deref(), Some("secret"));
    session.on_login().await;

    for key in ResourceKey::SHARED {
      assert!(session.client.cache().cached(&key).is_some(), "{:?}", key);
    }
    assert!(session.gate.has_permission(4, Action::View));

    let note = notes.recv().await.unwrap();
    assert_eq!(note.level, NotificationLevel::Info);
  }

  #[tokio::test]
  async fn test_logout_clears_everything() {
    let transport = seeded();
    let (session, storage) = controller(transport.clone());
    let mut events = session.bus.subscribe();

    session.login("secret".into(), Some(2));
    session.on_login().await;
    assert!(!storage.keys().unwrap().is_empty());

    session.logout();

    for key in ResourceKey::SHARED {
      assert!(session.client.cache().cached(&key).is_none());
      assert!(session.client.cache().store().persisted(&key).is_none());
    }
    assert!(storage
      .keys()
      .unwrap()
      .iter()
      .all(|k| !k.starts_with("etribe.cache.")));
    assert_eq!(session.gate.state(), PermissionState::Uninitialized);
    for module in crate::permissions::MODULES {
      for action in [Action::Add, Action::Edit, Action::View, Action::Delete] {
        assert!(!session.gate.has_permission(module.id, action));
      }
    }
    assert_eq!(*transport.token.lock().unwrap(), None);

    assert_eq!(events.recv().await.unwrap(), SessionEvent::Login);
    assert_eq!(events.recv().await.unwrap(), SessionEvent::Logout);
  }

  #[tokio::test]
  async fn test_forced_logout_handled_by_listener() {
    let transport = seeded();
    let (session, _) = controller(transport.clone());
    session.login("secret".into(), Some(2));
    session.on_login().await;
    let listener = session.spawn_listener();

    transport.respond("contact", Err(FetchError::Unauthorized));
    let err = session.client.contacts(true).await.unwrap_err();
    assert_eq!(err, FetchError::Unauthorized);

    // The coordinator already cleared the cache; the listener drops the rest.
    for _ in 0..50 {
      if session.gate.state() == PermissionState::Uninitialized {
        break;
      }
      tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    assert!(!session.gate.has_permission(4, Action::View));
    assert!(session
      .client
      .cache()
      .cached(&ResourceKey::Contacts)
      .is_none());
    listener.abort();
  }
}
