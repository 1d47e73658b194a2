//! ETribe resource family: keys, endpoints, shapes and persistence modes.

use crate::cache::{PersistMode, ResourceId, Shape};

/// Sub-resources of the compound `members` resource, in fetch order.
pub const MEMBER_PARTS: &[&str] = &["active", "inactive", "expired"];

/// One independently cached unit of ETribe data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKey {
  /// Active, inactive and expired members, cached as one group
  Members,
  EventsFuture,
  EventsPast,
  Contacts,
  GroupData,
  ProfileSettings,
  /// Permission records of one role
  Permissions { role_id: u32 },
}

impl ResourceKey {
  /// Every resource that does not depend on the current role.
  pub const SHARED: [ResourceKey; 6] = [
    ResourceKey::Members,
    ResourceKey::EventsFuture,
    ResourceKey::EventsPast,
    ResourceKey::Contacts,
    ResourceKey::GroupData,
    ResourceKey::ProfileSettings,
  ];

  /// Parse a user-facing name. Member sub-resource names resolve to the
  /// members group; `permissions` needs a role (`permissions.3`).
  pub fn parse(name: &str) -> Option<Self> {
    let name = name.trim();
    match name {
      "members" | "members.active" | "members.inactive" | "members.expired" => Some(Self::Members),
      "events" | "events.future" => Some(Self::EventsFuture),
      "events.past" => Some(Self::EventsPast),
      "contacts" => Some(Self::Contacts),
      "groupData" | "groups" => Some(Self::GroupData),
      "profile" => Some(Self::ProfileSettings),
      _ => name
        .strip_prefix("permissions.")
        .and_then(|role| role.parse().ok())
        .map(|role_id| Self::Permissions { role_id }),
    }
  }

  /// API path, relative to the configured base URL.
  ///
  /// For `Members` this is the prefix of the per-part paths; see
  /// [`ResourceKey::member_part_path`].
  pub fn path(&self) -> String {
    match self {
      Self::Members => "member".to_string(),
      Self::EventsFuture => "event/future".to_string(),
      Self::EventsPast => "event/past".to_string(),
      Self::Contacts => "contact".to_string(),
      Self::GroupData => "groupSettings".to_string(),
      Self::ProfileSettings => "profile".to_string(),
      Self::Permissions { role_id } => format!("rolePermission/{}", role_id),
    }
  }

  /// API path of one members sub-resource.
  pub fn member_part_path(part: &str) -> String {
    format!("member/{}", part)
  }

  pub fn is_permissions(&self) -> bool {
    matches!(self, Self::Permissions { .. })
  }
}

impl ResourceId for ResourceKey {
  fn storage_name(&self) -> String {
    match self {
      Self::Members => "members".to_string(),
      Self::EventsFuture => "events.future".to_string(),
      Self::EventsPast => "events.past".to_string(),
      Self::Contacts => "contacts".to_string(),
      Self::GroupData => "groupData".to_string(),
      Self::ProfileSettings => "profile".to_string(),
      Self::Permissions { role_id } => format!("permissions.{}", role_id),
    }
  }

  fn from_storage_name(name: &str) -> Option<Self> {
    // Storage names are a subset of the accepted user-facing names.
    Self::parse(name).filter(|key| key.storage_name() == name)
  }

  fn shape(&self) -> Shape {
    match self {
      Self::Members => Shape::Group {
        parts: MEMBER_PARTS,
        named: &["members"],
      },
      Self::EventsFuture | Self::EventsPast => Shape::Array {
        named: &["events"],
      },
      Self::Contacts => Shape::Array {
        named: &["contacts"],
      },
      Self::GroupData => Shape::Array {
        named: &["groups", "groupData"],
      },
      Self::ProfileSettings => Shape::Object,
      Self::Permissions { .. } => Shape::Array {
        named: &["permissions"],
      },
    }
  }

  fn persist_mode(&self) -> PersistMode {
    match self {
      // Dashboard aggregates can be large; only their freshness is kept.
      Self::Members | Self::EventsFuture | Self::EventsPast => PersistMode::Summary,
      _ => PersistMode::Full,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_storage_names_round_trip() {
    let mut keys = ResourceKey::SHARED.to_vec();
    keys.push(ResourceKey::Permissions { role_id: 12 });
    for key in keys {
      assert_eq!(ResourceKey::from_storage_name(&key.storage_name()), Some(key));
    }
  }

  #[test]
  fn test_member_parts_resolve_to_group() {
    for name in ["members.active", "members.inactive", "members.expired"] {
      assert_eq!(ResourceKey::parse(name), Some(ResourceKey::Members));
      assert_eq!(ResourceKey::from_storage_name(name), None);
    }
  }

  #[test]
  fn test_permissions_need_role() {
    assert_eq!(ResourceKey::parse("permissions"), None);
    assert_eq!(ResourceKey::parse("permissions.x"), None);
    assert_eq!(
      ResourceKey::parse("permissions.4"),
      Some(ResourceKey::Permissions { role_id: 4 })
    );
  }

  #[test]
  fn test_paths() {
    assert_eq!(ResourceKey::Contacts.path(), "contact");
    assert_eq!(
      ResourceKey::Permissions { role_id: 2 }.path(),
      "rolePermission/2"
    );
    assert_eq!(ResourceKey::member_part_path("expired"), "member/expired");
  }
}
