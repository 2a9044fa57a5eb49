//! Classification of everything that can go wrong on a backend call.

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Coarse failure taxonomy shown to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
  Offline,
  Timeout,
  RateLimited,
  ServerUnavailable,
  ServiceBlocked,
  ClientError,
  Storage,
}

impl FailureKind {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Offline => "offline",
      Self::Timeout => "timeout",
      Self::RateLimited => "rate_limited",
      Self::ServerUnavailable => "server_unavailable",
      Self::ServiceBlocked => "service_blocked",
      Self::ClientError => "client_error",
      Self::Storage => "storage",
    }
  }
}

impl std::fmt::Display for FailureKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A classified backend call failure.
///
/// Cloneable so a single failure can be handed to every caller that shared
/// an in-flight request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
  #[error("no network connection")]
  Offline,

  #[error("request timed out after {}s", after.as_secs())]
  Timeout { after: Duration },

  #[error("rate limited{}", retry_after_secs.map(|s| format!(" (retry after {}s)", s)).unwrap_or_default())]
  RateLimited { retry_after_secs: Option<u64> },

  #[error("server unavailable: {message}")]
  ServerUnavailable { status: Option<u16>, message: String },

  #[error("service blocked after repeated failures (retry in {retry_in_secs}s)")]
  ServiceBlocked { retry_in_secs: i64 },

  #[error("{message}")]
  ClientError { status: Option<u16>, message: String },

  #[error("local storage error: {0}")]
  Storage(String),
}

impl CallError {
  pub fn kind(&self) -> FailureKind {
    match self {
      Self::Offline => FailureKind::Offline,
      Self::Timeout { .. } => FailureKind::Timeout,
      Self::RateLimited { .. } => FailureKind::RateLimited,
      Self::ServerUnavailable { .. } => FailureKind::ServerUnavailable,
      Self::ServiceBlocked { .. } => FailureKind::ServiceBlocked,
      Self::ClientError { .. } => FailureKind::ClientError,
      Self::Storage(_) => FailureKind::Storage,
    }
  }

  /// Whether this failure is evidence that the backend is unhealthy.
  pub fn trips_breaker(&self) -> bool {
    matches!(
      self,
      Self::Timeout { .. } | Self::RateLimited { .. } | Self::ServerUnavailable { .. }
    )
  }

  /// Text suitable for showing to an analyst.
  pub fn user_message(&self) -> String {
    match self {
      Self::Offline => "You are offline.".to_string(),
      Self::Timeout { .. } => "The assistant took too long to respond. Please try again.".to_string(),
      Self::RateLimited { retry_after_secs } => match retry_after_secs {
        Some(secs) => format!(
          "The assistant is handling too many requests. Please wait {}s and try again.",
          secs
        ),
        None => "The assistant is handling too many requests. Please wait a moment and try again."
          .to_string(),
      },
      Self::ServerUnavailable { .. } => {
        "The assistant service is currently unavailable. Please try again later.".to_string()
      }
      Self::ServiceBlocked { retry_in_secs } => format!(
        "The assistant service is temporarily paused after repeated failures. Retrying in {}s.",
        retry_in_secs
      ),
      Self::ClientError { message, .. } => message.clone(),
      Self::Storage(_) => "Could not save your message locally.".to_string(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_only_health_failures_trip_breaker() {
    assert!(CallError::Timeout {
      after: Duration::from_secs(1)
    }
    .trips_breaker());
    assert!(CallError::RateLimited {
      retry_after_secs: None
    }
    .trips_breaker());
    assert!(CallError::ServerUnavailable {
      status: Some(503),
      message: "down".into()
    }
    .trips_breaker());

    assert!(!CallError::ClientError {
      status: Some(404),
      message: "not found".into()
    }
    .trips_breaker());
    assert!(!CallError::Offline.trips_breaker());
    assert!(!CallError::ServiceBlocked { retry_in_secs: 3 }.trips_breaker());
  }

  #[test]
  fn test_rate_limited_message_mentions_wait() {
    let err = CallError::RateLimited {
      retry_after_secs: Some(12),
    };
    assert_eq!(err.to_string(), "rate limited (retry after 12s)");
    assert!(err.user_message().contains("wait 12s"));
    assert_eq!(err.kind().as_str(), "rate_limited");
  }

  #[test]
  fn test_client_error_is_verbatim() {
    let err = CallError::ClientError {
      status: Some(422),
      message: "title must not be empty".into(),
    };
    assert_eq!(err.user_message(), "title must not be empty");
  }
}
