//! Permission gate: CRUD capability checks over the cached role permissions.
//!
//! Every check fails closed. While permissions are loading, after a failed
//! load, after logout, and for modules or routes without a record the
//! answer is `false`.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::cache::FetchError;
use crate::etribe::types::{decode_rows, PermissionRecord};
use crate::etribe::{EtribeClient, ResourceKey};

/// Operation checked against a module's capability flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
  Add,
  Edit,
  View,
  Delete,
}

impl Action {
  pub fn allowed_by(&self, record: &PermissionRecord) -> bool {
    match self {
      Action::Add => record.can_add,
      Action::Edit => record.can_edit,
      Action::View => record.can_view,
      Action::Delete => record.can_delete,
    }
  }
}

impl FromStr for Action {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_lowercase().as_str() {
      "add" | "create" => Ok(Action::Add),
      "edit" | "update" => Ok(Action::Edit),
      "view" | "read" => Ok(Action::View),
      "delete" | "remove" => Ok(Action::Delete),
      other => Err(format!(
        "unknown action '{}' (expected add, edit, view or delete)",
        other
      )),
    }
  }
}

impl fmt::Display for Action {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Action::Add => "add",
      Action::Edit => "edit",
      Action::View => "view",
      Action::Delete => "delete",
    };
    f.write_str(name)
  }
}

/// Entry of the fixed module catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Module {
  pub id: u32,
  pub name: &'static str,
  /// Route prefix guarded by this module's `view` flag
  pub route: &'static str,
}

pub const MODULES: &[Module] = &[
  Module {
    id: 1,
    name: "dashboard",
    route: "/dashboard",
  },
  Module {
    id: 2,
    name: "members",
    route: "/members",
  },
  Module {
    id: 3,
    name: "events",
    route: "/events",
  },
  Module {
    id: 4,
    name: "contacts",
    route: "/contacts",
  },
  Module {
    id: 5,
    name: "groups",
    route: "/groups",
  },
  Module {
    id: 6,
    name: "settings",
    route: "/settings",
  },
  Module {
    id: 7,
    name: "roles",
    route: "/settings/roles",
  },
  Module {
    id: 8,
    name: "reports",
    route: "/reports",
  },
];

/// Look a module up by name (case-insensitive) or numeric id.
pub fn find_module(name_or_id: &str) -> Option<&'static Module> {
  let needle = name_or_id.trim();
  if let Ok(id) = needle.parse::<u32>() {
    return MODULES.iter().find(|m| m.id == id);
  }
  MODULES.iter().find(|m| m.name.eq_ignore_ascii_case(needle))
}

/// Module guarding `path`: the longest route prefix that matches on a
/// segment boundary.
pub fn module_for_route(path: &str) -> Option<&'static Module> {
  let path = path.split(['?', '#']).next().unwrap_or(path);
  let path = path.trim_end_matches('/');
  MODULES
    .iter()
    .filter(|m| {
      path == m.route
        || path
          .strip_prefix(m.route)
          .is_some_and(|rest| rest.starts_with('/'))
    })
    .max_by_key(|m| m.route.len())
}

/// Lifecycle of the permission set
#[derive(Debug, Clone, PartialEq)]
pub enum PermissionState {
  Uninitialized,
  Loading,
  Ready(HashMap<u32, PermissionRecord>),
  Error(FetchError),
}

impl PermissionState {
  fn ready(records: Vec<PermissionRecord>) -> Self {
    PermissionState::Ready(records.into_iter().map(|r| (r.module_id, r)).collect())
  }

  pub fn label(&self) -> &'static str {
    match self {
      PermissionState::Uninitialized => "uninitialized",
      PermissionState::Loading => "loading",
      PermissionState::Ready(_) => "ready",
      PermissionState::Error(_) => "error",
    }
  }
}

struct GateState {
  role_id: Option<u32>,
  state: PermissionState,
  /// Bumped by every load, role change and reset; a load only publishes its
  /// outcome if no newer transition happened meanwhile.
  generation: u64,
}

/// Answers "may the current role do A on module M".
#[derive(Clone)]
pub struct PermissionGate {
  client: EtribeClient,
  inner: Arc<Mutex<GateState>>,
}

impl PermissionGate {
  pub fn new(client: EtribeClient) -> Self {
    Self {
      client,
      inner: Arc::new(Mutex::new(GateState {
        role_id: None,
        state: PermissionState::Uninitialized,
        generation: 0,
      })),
    }
  }

  fn lock(&self) -> MutexGuard<'_, GateState> {
    self.inner.lock().unwrap_or_else(|e| e.into_inner())
  }

  pub fn state(&self) -> PermissionState {
    self.lock().state.clone()
  }

  pub fn role_id(&self) -> Option<u32> {
    self.lock().role_id
  }

  /// Bind the gate to `role_id`. Becomes `Ready` immediately when the cache
  /// already holds usable permissions for that role, even stale ones.
  pub fn init(&self, role_id: u32) -> bool {
    let key = ResourceKey::Permissions { role_id };
    let store = self.client.cache().store();
    let cached = store.get(&key);

    let mut gate = self.lock();
    gate.role_id = Some(role_id);
    gate.generation += 1;
    match cached {
      Some(entry) if store.has_usable_data(&key, Some(&entry)) => {
        gate.state = PermissionState::ready(decode_rows(&entry.data));
        debug!(role_id, "permissions ready from cache");
        true
      }
      _ => {
        gate.state = PermissionState::Uninitialized;
        false
      }
    }
  }

  /// Load the permission set of the current role through the cache.
  pub async fn load(&self, force: bool) -> Result<(), FetchError> {
    let (role_id, generation) = {
      let mut gate = self.lock();
      let Some(role_id) = gate.role_id else {
        debug!("no role set, skipping permission load");
        return Ok(());
      };
      gate.generation += 1;
      gate.state = PermissionState::Loading;
      (role_id, gate.generation)
    };

    let result = self.client.permissions(role_id, force).await;

    let mut gate = self.lock();
    if gate.generation != generation {
      debug!(role_id, "permission load superseded");
      return result.map(|_| ());
    }
    match result {
      Ok(records) => {
        info!(role_id, modules = records.len(), "permissions loaded");
        gate.state = PermissionState::ready(records);
        Ok(())
      }
      Err(e) => {
        warn!(role_id, error = %e, "failed to load permissions");
        gate.state = PermissionState::Error(e.clone());
        Err(e)
      }
    }
  }

  /// Switch to another role. Every cached permission set is dropped since
  /// flags are role-scoped.
  pub async fn set_role(&self, role_id: u32) -> Result<(), FetchError> {
    self
      .client
      .cache()
      .store()
      .invalidate_where(|key| key.is_permissions());
    {
      let mut gate = self.lock();
      gate.role_id = Some(role_id);
      gate.generation += 1;
      gate.state = PermissionState::Uninitialized;
    }
    info!(role_id, "role changed");
    self.load(false).await
  }

  /// Forget the role and every loaded flag.
  pub fn reset(&self) {
    let mut gate = self.lock();
    gate.role_id = None;
    gate.generation += 1;
    gate.state = PermissionState::Uninitialized;
  }

  pub fn has_permission(&self, module_id: u32, action: Action) -> bool {
    match &self.lock().state {
      PermissionState::Ready(records) => records
        .get(&module_id)
        .is_some_and(|record| action.allowed_by(record)),
      _ => false,
    }
  }

  /// Route guard: a route is reachable when its module grants `view`.
  /// Routes outside the catalog are denied.
  pub fn can_access_route(&self, path: &str) -> bool {
    match module_for_route(path) {
      Some(module) => self.has_permission(module.id, Action::View),
      None => {
        debug!(path, "route not mapped to a module, denying");
        false
      }
    }
  }
}
