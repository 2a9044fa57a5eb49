use chrono::{DateTime, Duration, Utc};
use color_eyre::Result;
use serde_json::Value;
use std::sync::Arc;

use crate::store::{LocalStore, StoredSnapshot, FORMAT_VERSION};

pub const DEFAULT_FALLBACK_WINDOW_DAYS: i64 = 7;

/// A degraded payload served from the persisted snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackHit {
  pub payload: Value,
  pub stored_at: DateTime<Utc>,
  /// Older than the live ttl of its endpoint
  pub stale: bool,
}

/// Long-lived, persisted last-known-good payloads.
pub struct FallbackStore {
  store: Arc<dyn LocalStore>,
  window: Duration,
}

impl FallbackStore {
  pub fn new(store: Arc<dyn LocalStore>, window: Duration) -> Self {
    Self { store, window }
  }

  pub fn put(&self, key: &str, payload: Value, now: DateTime<Utc>) -> Result<()> {
    self.store.save_snapshot(
      key,
      &StoredSnapshot {
        payload,
        stored_at: now,
        version: FORMAT_VERSION.to_string(),
      },
    )
  }

  /// Look up a snapshot still inside the freshness window.
  ///
  /// Snapshots past the window or written under another format version are
  /// purged and reported as a miss. Storage errors are logged and treated as
  /// a miss.
  pub fn get(&self, key: &str, live_ttl: Duration, now: DateTime<Utc>) -> Option<FallbackHit> {
    let snapshot = match self.store.load_snapshot(key) {
      Ok(Some(snapshot)) => snapshot,
      Ok(None) => return None,
      Err(e) => {
        tracing::warn!(%key, error = %e, "failed to read fallback snapshot");
        return None;
      }
    };

    if snapshot.version != FORMAT_VERSION {
      tracing::warn!(%key, version = %snapshot.version, "discarding fallback snapshot with unknown format version");
      self.purge(key);
      return None;
    }

    let age = now - snapshot.stored_at;
    if age >= self.window {
      tracing::debug!(%key, age_hours = age.num_hours(), "fallback snapshot expired");
      self.purge(key);
      return None;
    }

    Some(FallbackHit {
      payload: snapshot.payload,
      stored_at: snapshot.stored_at,
      stale: age >= live_ttl,
    })
  }

  fn purge(&self, key: &str) {
    if let Err(e) = self.store.remove_snapshot(key) {
      tracing::warn!(%key, error = %e, "failed to remove fallback snapshot");
    }
  }
}
