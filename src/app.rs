use crate::cache::{
  session_namespace, FetchCoordinator, MemorySessionStorage, NoopStorage, ResourceCacheStore,
  ResourceId, SessionPersistence, SessionStorage, SqliteSessionStorage, SystemClock,
};
use crate::commands::{Command, ContactCommand};
use crate::config::Config;
use crate::etribe::{ApiClient, EtribeClient, ResourceKey};
use crate::event::EventBus;
use crate::permissions::{find_module, module_for_route, Action, PermissionGate};
use crate::session::SessionController;
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

/// Main application state
pub struct App {
  config: Config,
  token: Option<String>,
  session: SessionController,
}

/// Pick the session storage backend for this configuration.
fn open_storage(config: &Config, token: Option<&str>) -> Arc<dyn SessionStorage> {
  if config.cache.policy().is_none() {
    return Arc::new(NoopStorage);
  }
  let namespace = session_namespace(&config.api.base_url, token);
  match SqliteSessionStorage::open(&namespace) {
    Ok(storage) => Arc::new(storage),
    Err(e) => {
      warn!(error = %e, "session storage unavailable, caching in memory only");
      Arc::new(MemorySessionStorage::new())
    }
  }
}

impl App {
  pub fn new(config: Config, token: Option<String>) -> Result<Self> {
    let storage = open_storage(&config, token.as_deref());
    let persistence =
      SessionPersistence::new(storage).with_policy(config.cache.policy().unwrap_or_default());
    let store =
      ResourceCacheStore::new(persistence, Arc::new(SystemClock)).with_ttl(config.cache.ttl());
    let cache = FetchCoordinator::new(store, EventBus::new()).with_timeout(config.api.timeout());

    let api = ApiClient::new(&config)?;
    let client = EtribeClient::new(Arc::new(api), cache);
    let gate = PermissionGate::new(client.clone());
    let session = SessionController::new(client, gate);

    Ok(Self {
      config,
      token,
      session,
    })
  }

  fn client(&self) -> &EtribeClient {
    self.session.client()
  }

  /// Resume the session: install the token and bind the configured role.
  async fn resume(&self, command: &Command) -> Result<()> {
    let token = self.token.clone().ok_or_else(|| {
      eyre!("ETribe API token not found. Set ETRIBE_API_TOKEN or ETRIBE_TOKEN environment variable.")
    })?;
    self.client().transport().set_token(Some(token));

    if let Some(role_id) = self.config.role_id {
      let gate = self.session.gate();
      if !gate.init(role_id) && command.needs_permissions() {
        if let Err(e) = gate.load(false).await {
          warn!(error = %e, "permissions unavailable");
        }
      }
    }
    Ok(())
  }

  pub async fn run(&self, command: Command) -> Result<()> {
    if command.needs_token() {
      self.resume(&command).await?;
    }

    match command {
      Command::Show { resource, force } => {
        let key = ResourceKey::parse(&resource)
          .ok_or_else(|| eyre!("Unknown resource '{}'", resource))?;
        let view = self.client().use_resource(key);
        let state = if force {
          view.refresh_force().await
        } else {
          view.refresh().await
        };
        if let Some(e) = state.error {
          return Err(eyre!(e.user_message()));
        }
        info!(resource = %key.storage_name(), cached_at = ?state.cached_at, "shown");
        print_json(&state.data.unwrap_or(Value::Null))?;
      }
      Command::Stats { force } => {
        let client = self.client();
        let (members, future, past) = tokio::join!(
          client.member_counts(force),
          client.future_events(force),
          client.past_events(force),
        );
        let stats = json!({
          "members": members.map_err(|e| eyre!(e.user_message()))?,
          "events": {
            "upcoming": future.map_err(|e| eyre!(e.user_message()))?.len(),
            "past": past.map_err(|e| eyre!(e.user_message()))?.len(),
          },
        });
        print_json(&stats)?;
      }
      Command::Status => {
        let rows: Vec<StatusRow> = self.status_keys().iter().map(|k| self.status_row(k)).collect();
        print_json(&rows)?;
      }
      Command::Can { module, action } => {
        let module =
          find_module(&module).ok_or_else(|| eyre!("Unknown module '{}'", module))?;
        let action: Action = action.parse().map_err(|e: String| eyre!(e))?;
        let allowed = self.session.gate().has_permission(module.id, action);
        println!(
          "{} {} {}: {}",
          module.name,
          action,
          self.session.gate().state().label(),
          if allowed { "allowed" } else { "denied" }
        );
      }
      Command::Route { path } => {
        let allowed = self.session.gate().can_access_route(&path);
        let module = module_for_route(&path).map(|m| m.name).unwrap_or("unmapped");
        println!(
          "{} ({}): {}",
          path,
          module,
          if allowed { "allowed" } else { "denied" }
        );
      }
      Command::Role { role_id } => {
        self
          .session
          .gate()
          .set_role(role_id)
          .await
          .map_err(|e| eyre!(e.user_message()))?;
        println!("Role {} loaded", role_id);
      }
      Command::Login => {
        let token = self.token.clone().unwrap_or_default();
        let mut notes = self.client().cache().bus().notifications();
        self.session.login(token, self.config.role_id);
        self.session.on_login().await;
        while let Ok(note) = notes.try_recv() {
          match &note.resource {
            Some(resource) => println!("{}: {}", resource, note.message),
            None => println!("{}", note.message),
          }
        }
      }
      Command::Logout => {
        self.session.logout();
        println!("Session cache cleared");
      }
      Command::Contact(contact) => {
        let client = self.client();
        let contacts = match contact {
          ContactCommand::Add { json } => client.add_contact(parse_object(&json)?).await,
          ContactCommand::Update { id, json } => {
            client.update_contact(&id, parse_object(&json)?).await
          }
          ContactCommand::Delete { id } => client.delete_contact(&id).await,
        }
        .map_err(|e| eyre!(e.user_message()))?;
        println!("{} contacts", contacts.len());
      }
    }

    Ok(())
  }

  fn status_keys(&self) -> Vec<ResourceKey> {
    let mut keys = ResourceKey::SHARED.to_vec();
    if let Some(role_id) = self.config.role_id {
      keys.push(ResourceKey::Permissions { role_id });
    }
    keys
  }

  fn status_row(&self, key: &ResourceKey) -> StatusRow {
    let cache = self.client().cache();
    let store = cache.store();
    let entry = cache.cached(key);
    let persisted = store.persisted(key);
    let status = cache.status(key);

    StatusRow {
      resource: key.storage_name(),
      cached: entry.is_some(),
      fresh: store.is_fresh(entry.as_ref(), false),
      usable: store.has_usable_data(key, entry.as_ref()),
      age_secs: entry
        .as_ref()
        .map(|e| (store.now_ms() - e.timestamp) / 1000)
        .or_else(|| {
          persisted
            .as_ref()
            .map(|p| (store.now_ms() - p.timestamp()) / 1000)
        }),
      persisted_records: persisted.as_ref().map(|p| p.data_size()),
      loading: status.loading,
      error: status.error.map(|e| e.to_string()),
    }
  }
}

#[derive(Debug, Serialize)]
struct StatusRow {
  resource: String,
  cached: bool,
  fresh: bool,
  usable: bool,
  age_secs: Option<i64>,
  persisted_records: Option<usize>,
  loading: bool,
  error: Option<String>,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
  let out =
    serde_json::to_string_pretty(value).map_err(|e| eyre!("Failed to render output: {}", e))?;
  println!("{}", out);
  Ok(())
}

fn parse_object(raw: &str) -> Result<Value> {
  let value: Value =
    serde_json::from_str(raw).map_err(|e| eyre!("Invalid contact JSON: {}", e))?;
  if !value.is_object() {
    return Err(eyre!("Contact must be a JSON object"));
  }
  Ok(value)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_object() {
    assert!(parse_object(r#"{"name": "Ann"}"#).is_ok());
    assert!(parse_object("[1]").is_err());
    assert!(parse_object("{").is_err());
  }
}
