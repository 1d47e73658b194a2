//! Typed views over canonical ETribe payloads.
//!
//! The cache stores normalized JSON; these types are what callers work
//! with. Decoding is lenient: unknown fields are kept in `extra` and rows
//! that fail to deserialize are skipped rather than failing the whole list.

use serde::de::{self, DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

use super::resources::MEMBER_PARTS;

/// Accept ids as either JSON strings or numbers.
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
  D: Deserializer<'de>,
{
  match Value::deserialize(deserializer)? {
    Value::String(s) => Ok(s),
    Value::Number(n) => Ok(n.to_string()),
    Value::Null => Ok(String::new()),
    other => Err(de::Error::custom(format!("expected id, got {}", other))),
  }
}

/// Accept capability flags as booleans, 0/1 or "0"/"1"/"true"/"false".
fn lenient_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
  D: Deserializer<'de>,
{
  match Value::deserialize(deserializer)? {
    Value::Bool(b) => Ok(b),
    Value::Number(n) => Ok(n.as_i64().unwrap_or(0) != 0),
    Value::String(s) => Ok(matches!(s.trim(), "1" | "true" | "TRUE" | "True")),
    Value::Null => Ok(false),
    other => Err(de::Error::custom(format!("expected flag, got {}", other))),
  }
}

fn lenient_u32<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
  D: Deserializer<'de>,
{
  match Value::deserialize(deserializer)? {
    Value::Number(n) => n
      .as_u64()
      .and_then(|n| u32::try_from(n).ok())
      .ok_or_else(|| de::Error::custom(format!("module id out of range: {}", n))),
    Value::String(s) => s
      .trim()
      .parse()
      .map_err(|_| de::Error::custom(format!("invalid module id: {}", s))),
    other => Err(de::Error::custom(format!("expected module id, got {}", other))),
  }
}

/// Member of the organization
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Member {
  #[serde(alias = "_id", alias = "memberId", deserialize_with = "lenient_string")]
  pub id: String,
  #[serde(default)]
  pub name: String,
  #[serde(default)]
  pub email: Option<String>,
  #[serde(flatten)]
  pub extra: BTreeMap<String, Value>,
}

/// Scheduled or past event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
  #[serde(alias = "_id", alias = "eventId", deserialize_with = "lenient_string")]
  pub id: String,
  #[serde(default, alias = "title", alias = "eventName")]
  pub name: String,
  #[serde(default, alias = "startDate", alias = "date")]
  pub start_date: Option<String>,
  #[serde(flatten)]
  pub extra: BTreeMap<String, Value>,
}

/// Address book entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Contact {
  #[serde(alias = "_id", alias = "contactId", deserialize_with = "lenient_string")]
  pub id: String,
  #[serde(default)]
  pub name: String,
  #[serde(default)]
  pub email: Option<String>,
  #[serde(default, alias = "phoneNumber", alias = "mobile")]
  pub phone: Option<String>,
  #[serde(flatten)]
  pub extra: BTreeMap<String, Value>,
}

/// Group settings record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroupRecord {
  #[serde(alias = "_id", alias = "groupId", deserialize_with = "lenient_string")]
  pub id: String,
  #[serde(default, alias = "groupName")]
  pub name: String,
  #[serde(flatten)]
  pub extra: BTreeMap<String, Value>,
}

/// Profile settings of the organization
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProfileSettings {
  #[serde(default, alias = "organizationName", alias = "orgName")]
  pub name: Option<String>,
  #[serde(default)]
  pub email: Option<String>,
  #[serde(flatten)]
  pub extra: BTreeMap<String, Value>,
}

/// CRUD capabilities of the current role on one module
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRecord {
  #[serde(alias = "module_id", deserialize_with = "lenient_u32")]
  pub module_id: u32,
  #[serde(default, alias = "can_add", alias = "isAdd", deserialize_with = "lenient_flag")]
  pub can_add: bool,
  #[serde(default, alias = "can_edit", alias = "isEdit", deserialize_with = "lenient_flag")]
  pub can_edit: bool,
  #[serde(default, alias = "can_view", alias = "isView", deserialize_with = "lenient_flag")]
  pub can_view: bool,
  #[serde(default, alias = "can_delete", alias = "isDelete", deserialize_with = "lenient_flag")]
  pub can_delete: bool,
}

/// The three member lists, decoded from one consistent cache entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemberGroup {
  pub active: Vec<Member>,
  pub inactive: Vec<Member>,
  pub expired: Vec<Member>,
}

impl MemberGroup {
  pub fn from_value(value: &Value) -> Self {
    let part = |name: &str| value.get(name).map(decode_rows::<Member>).unwrap_or_default();
    Self {
      active: part(MEMBER_PARTS[0]),
      inactive: part(MEMBER_PARTS[1]),
      expired: part(MEMBER_PARTS[2]),
    }
  }

  pub fn counts(&self) -> MemberCounts {
    MemberCounts {
      active: self.active.len(),
      inactive: self.inactive.len(),
      expired: self.expired.len(),
      total: self.active.len() + self.inactive.len() + self.expired.len(),
    }
  }
}

/// Aggregate dashboard statistics over the members group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemberCounts {
  pub active: usize,
  pub inactive: usize,
  pub expired: usize,
  pub total: usize,
}

/// Decode every row of a canonical list payload, skipping malformed rows.
pub fn decode_rows<T: DeserializeOwned>(value: &Value) -> Vec<T> {
  let Some(rows) = value.as_array() else {
    return Vec::new();
  };
  rows
    .iter()
    .filter_map(|row| match T::deserialize(row) {
      Ok(decoded) => Some(decoded),
      Err(e) => {
        debug!(error = %e, "skipping malformed row");
        None
      }
    })
    .collect()
}

/// Decode a canonical object payload, falling back to the default.
pub fn decode_object<T: DeserializeOwned + Default>(value: &Value) -> T {
  T::deserialize(value).unwrap_or_else(|e| {
    debug!(error = %e, "malformed object payload");
    T::default()
  })
}
