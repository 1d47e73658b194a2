//! Command-line commands.

use clap::Subcommand;

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
  /// Print a resource as JSON (members, events.future, events.past,
  /// contacts, groupData, profile, permissions.<role>)
  Show {
    resource: String,
    /// Bypass the cache
    #[arg(short, long)]
    force: bool,
  },
  /// Dashboard statistics
  Stats {
    #[arg(short, long)]
    force: bool,
  },
  /// Cache state of every resource
  Status,
  /// Check a permission, e.g. `can contacts edit`
  Can {
    /// Module name or id
    module: String,
    /// add, edit, view or delete
    action: String,
  },
  /// Check whether a route is accessible
  Route { path: String },
  /// Switch role; drops every cached permission set
  Role { role_id: u32 },
  /// Start a session and load every resource
  Login,
  /// Clear every cache of the current session
  Logout,
  /// Manage contacts
  #[command(subcommand)]
  Contact(ContactCommand),
}

#[derive(Subcommand, Debug, Clone)]
pub enum ContactCommand {
  /// Create a contact from a JSON object
  Add { json: String },
  /// Update a contact from a JSON object
  Update { id: String, json: String },
  Delete { id: String },
}

impl Command {
  /// Whether the command talks to the API and so needs a token.
  pub fn needs_token(&self) -> bool {
    !matches!(self, Command::Status | Command::Logout)
  }

  /// Whether the permission set must be loaded before running.
  pub fn needs_permissions(&self) -> bool {
    matches!(self, Command::Can { .. } | Command::Route { .. })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_token_requirements() {
    assert!(!Command::Status.needs_token());
    assert!(!Command::Logout.needs_token());
    assert!(Command::Login.needs_token());
    assert!(Command::Route {
      path: "/x".to_string()
    }
    .needs_permissions());
    assert!(!Command::Stats { force: false }.needs_permissions());
  }
}
