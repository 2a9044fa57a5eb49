//! Per-endpoint-family circuit breaker.
//!
//! After `threshold` consecutive counted failures the breaker blocks calls
//! until `cooldown` has passed since the last failure. The first check after
//! the cooldown closes it again; there is no separate probing state.

use chrono::{DateTime, Duration, Utc};

pub const DEFAULT_THRESHOLD: u32 = 3;
pub const DEFAULT_COOLDOWN_SECS: i64 = 30;

/// Answer to "may I call the backend now?".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
  Allowed,
  Blocked { retry_in: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
  Closed,
  Open,
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
  failure_count: u32,
  last_failure_at: Option<DateTime<Utc>>,
  threshold: u32,
  cooldown: Duration,
}

impl CircuitBreaker {
  pub fn new(threshold: u32, cooldown: Duration) -> Self {
    Self {
      failure_count: 0,
      last_failure_at: None,
      threshold: threshold.max(1),
      cooldown,
    }
  }

  /// Check whether a call may proceed. Resets the count once the cooldown has elapsed.
  pub fn before_call(&mut self, now: DateTime<Utc>) -> Admission {
    if self.failure_count < self.threshold {
      return Admission::Allowed;
    }

    let since_failure = self
      .last_failure_at
      .map(|at| now - at)
      .unwrap_or(self.cooldown);

    if since_failure < self.cooldown {
      Admission::Blocked {
        retry_in: self.cooldown - since_failure,
      }
    } else {
      tracing::info!(failures = self.failure_count, "circuit cooldown elapsed, closing");
      self.failure_count = 0;
      Admission::Allowed
    }
  }

  pub fn on_success(&mut self) {
    self.failure_count = 0;
  }

  pub fn on_failure(&mut self, now: DateTime<Utc>) {
    self.failure_count = self.failure_count.saturating_add(1);
    self.last_failure_at = Some(now);
    if self.failure_count == self.threshold {
      tracing::warn!(
        failures = self.failure_count,
        cooldown_secs = self.cooldown.num_seconds(),
        "circuit opened"
      );
    }
  }

  /// Read-only view of the state, for status display.
  pub fn state(&self, now: DateTime<Utc>) -> BreakerState {
    let open = self.failure_count >= self.threshold
      && self
        .last_failure_at
        .is_some_and(|at| now - at < self.cooldown);
    if open {
      BreakerState::Open
    } else {
      BreakerState::Closed
    }
  }

  pub fn failure_count(&self) -> u32 {
    self.failure_count
  }
}

impl Default for CircuitBreaker {
  fn default() -> Self {
    Self::new(DEFAULT_THRESHOLD, Duration::seconds(DEFAULT_COOLDOWN_SECS))
  }
}
