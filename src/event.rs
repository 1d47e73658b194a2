use tokio::sync::broadcast;
use tracing::debug;

/// Session lifecycle signals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
  /// A user logged in; resources should be fetched eagerly
  Login,
  /// The session ended; every cache must be cleared
  Logout,
}

/// Severity of a user-facing notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
  Info,
  Error,
}

/// Transient message meant for the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
  pub level: NotificationLevel,
  /// Resource the message is about, if any
  pub resource: Option<String>,
  pub message: String,
}

impl Notification {
  pub fn error(resource: impl Into<String>, message: impl Into<String>) -> Self {
    Self {
      level: NotificationLevel::Error,
      resource: Some(resource.into()),
      message: message.into(),
    }
  }

  pub fn info(message: impl Into<String>) -> Self {
    Self {
      level: NotificationLevel::Info,
      resource: None,
      message: message.into(),
    }
  }
}

const CHANNEL_CAPACITY: usize = 64;

/// Process-wide pub/sub channel for session events and notifications.
///
/// Cloning shares the same channels. Publishing never fails: with no
/// subscribers the message is simply dropped.
#[derive(Debug, Clone)]
pub struct EventBus {
  session_tx: broadcast::Sender<SessionEvent>,
  notify_tx: broadcast::Sender<Notification>,
}

impl EventBus {
  pub fn new() -> Self {
    let (session_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
    let (notify_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
    Self {
      session_tx,
      notify_tx,
    }
  }

  pub fn publish(&self, event: SessionEvent) {
    debug!(?event, "session event");
    let _ = self.session_tx.send(event);
  }

  pub fn notify(&self, notification: Notification) {
    let _ = self.notify_tx.send(notification);
  }

  pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
    self.session_tx.subscribe()
  }

  pub fn notifications(&self) -> broadcast::Receiver<Notification> {
    self.notify_tx.subscribe()
  }
}

impl Default for EventBus {
  fn default() -> Self {
    Self::new()
  }
}
