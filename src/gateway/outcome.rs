//! Structured results returned by every gateway operation.

use chrono::{DateTime, Utc};

use crate::backend::{CallError, FailureKind};
use crate::cache::FallbackHit;

/// Where the data in an [`Outcome`] came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
  /// Fresh data from the backend
  Network,
  /// Served from the in-memory cache, still within its ttl
  Cache,
  /// Live path failed or was blocked; serving the persisted snapshot
  Fallback {
    stored_at: DateTime<Utc>,
    /// Snapshot is older than the endpoint's live ttl
    stale: bool,
  },
  /// Accepted into the offline queue, will be sent on reconnect
  Queued { id: String },
  /// Nothing to show
  None,
}

/// Result of a gateway call. Never an unhandled error: callers branch on
/// `success` and render `message`.
#[derive(Debug, Clone)]
pub struct Outcome<T> {
  pub success: bool,
  pub data: Option<T>,
  pub message: String,
  pub source: Source,
  pub failure: Option<FailureKind>,
}

impl<T> Outcome<T> {
  pub fn fresh(data: T) -> Self {
    Self {
      success: true,
      data: Some(data),
      message: String::new(),
      source: Source::Network,
      failure: None,
    }
  }

  pub fn cached(data: T) -> Self {
    Self {
      success: true,
      data: Some(data),
      message: String::new(),
      source: Source::Cache,
      failure: None,
    }
  }

  /// Degraded success: the live call failed with `cause` but a snapshot exists.
  pub fn fallback(data: T, hit: &FallbackHit, cause: &CallError) -> Self {
    Self {
      success: true,
      data: Some(data),
      message: format!(
        "Showing saved data from {} ({})",
        hit.stored_at.format("%Y-%m-%d %H:%M UTC"),
        cause.user_message()
      ),
      source: Source::Fallback {
        stored_at: hit.stored_at,
        stale: hit.stale,
      },
      failure: Some(cause.kind()),
    }
  }

  pub fn queued(id: String) -> Self {
    Self {
      success: true,
      data: None,
      message: "Message saved. It will be sent when the connection is restored.".to_string(),
      source: Source::Queued { id },
      failure: Some(FailureKind::Offline),
    }
  }

  pub fn failed(error: &CallError) -> Self {
    Self {
      success: false,
      data: None,
      message: error.user_message(),
      source: Source::None,
      failure: Some(error.kind()),
    }
  }

  /// True when the data is a fallback snapshot rather than a live answer.
  pub fn is_degraded(&self) -> bool {
    matches!(self.source, Source::Fallback { .. })
  }

  pub fn is_queued(&self) -> bool {
    matches!(self.source, Source::Queued { .. })
  }
}
