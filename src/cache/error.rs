//! Error taxonomy for fetches and session storage.

use thiserror::Error;

/// Failure of a resource fetch, as surfaced to callers.
///
/// Malformed response bodies are not represented here: they degrade to an
/// empty payload during normalization.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
  #[error("request timed out")]
  Timeout,
  #[error("unauthorized (401)")]
  Unauthorized,
  #[error("forbidden (403)")]
  Forbidden,
  #[error("server error ({0})")]
  ServerError(u16),
  #[error("request failed: {0}")]
  Unknown(String),
}

impl FetchError {
  /// Map an HTTP status code to an error, if it is one we classify.
  pub fn from_status(status: u16) -> Option<Self> {
    match status {
      401 => Some(Self::Unauthorized),
      403 => Some(Self::Forbidden),
      500..=599 => Some(Self::ServerError(status)),
      _ => None,
    }
  }

  /// Message shown to the user in a notification.
  pub fn user_message(&self) -> &'static str {
    match self {
      Self::Timeout => "The server took too long to respond. Please try again.",
      Self::Unauthorized => "Your session has expired. Please log in again.",
      Self::Forbidden => "You do not have permission to view this data.",
      Self::ServerError(_) => "The server encountered an error. Please try again later.",
      Self::Unknown(_) => "Something went wrong while loading data.",
    }
  }

  /// Whether this error invalidates the whole session rather than one resource.
  pub fn ends_session(&self) -> bool {
    matches!(self, Self::Unauthorized)
  }
}

/// Failure of the session storage backend. Always recovered by the
/// persistence adapter; never reaches users.
#[derive(Debug, Error)]
pub enum StorageError {
  #[error("session storage unavailable: {0}")]
  Unavailable(String),
  #[error("session storage quota exceeded")]
  QuotaExceeded,
  #[error("session storage backend error: {0}")]
  Backend(#[from] rusqlite::Error),
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_status_classification() {
    assert_eq!(FetchError::from_status(401), Some(FetchError::Unauthorized));
    assert_eq!(FetchError::from_status(403), Some(FetchError::Forbidden));
    assert_eq!(FetchError::from_status(502), Some(FetchError::ServerError(502)));
    assert_eq!(FetchError::from_status(404), None);
    assert_eq!(FetchError::from_status(200), None);
  }

  #[test]
  fn test_user_messages_are_distinct() {
    let errors = [
      FetchError::Timeout,
      FetchError::Unauthorized,
      FetchError::Forbidden,
      FetchError::ServerError(500),
      FetchError::Unknown("x".into()),
    ];
    let mut messages: Vec<_> = errors.iter().map(FetchError::user_message).collect();
    messages.sort();
    messages.dedup();
    assert_eq!(messages.len(), errors.len());
  }

  #[test]
  fn test_only_unauthorized_ends_session() {
    assert!(FetchError::Unauthorized.ends_session());
    assert!(!FetchError::Forbidden.ends_session());
    assert!(!FetchError::Timeout.ends_session());
  }
}
