//! Wall-clock source for freshness decisions.

use chrono::Utc;

/// Source of the current time in epoch milliseconds.
pub trait Clock: Send + Sync {
  fn now_ms(&self) -> i64;
}

/// Real wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now_ms(&self) -> i64 {
    Utc::now().timestamp_millis()
  }
}

#[cfg(test)]
pub use manual::ManualClock;

#[cfg(test)]
mod manual {
  use super::Clock;
  use std::sync::atomic::{AtomicI64, Ordering};
  use std::sync::Arc;

  /// Simulated clock that only moves when told to.
  #[derive(Debug, Clone, Default)]
  pub struct ManualClock {
    now: Arc<AtomicI64>,
  }

  impl ManualClock {
    pub fn at(ms: i64) -> Self {
      Self {
        now: Arc::new(AtomicI64::new(ms)),
      }
    }

    pub fn advance_ms(&self, ms: i64) {
      self.now.fetch_add(ms, Ordering::SeqCst);
    }
  }

  impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
      self.now.load(Ordering::SeqCst)
    }
  }
}
