use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Clone)]
struct CacheEntry {
  payload: Value,
  stored_at: DateTime<Utc>,
  ttl: Duration,
}

impl CacheEntry {
  fn is_fresh(&self, now: DateTime<Utc>) -> bool {
    now - self.stored_at < self.ttl
  }
}

/// In-memory cache, one entry per key.
#[derive(Debug, Default)]
pub struct ResponseCache {
  entries: Mutex<HashMap<String, CacheEntry>>,
}

impl ResponseCache {
  pub fn new() -> Self {
    Self::default()
  }

  /// Return the payload for `key` if it is younger than its ttl.
  pub fn get(&self, key: &str, now: DateTime<Utc>) -> Option<Value> {
    let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
    entries
      .get(key)
      .filter(|entry| entry.is_fresh(now))
      .map(|entry| entry.payload.clone())
  }

  /// Insert or overwrite the entry for `key`.
  pub fn put(&self, key: &str, payload: Value, ttl: Duration, now: DateTime<Utc>) {
    let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
    entries.insert(
      key.to_string(),
      CacheEntry {
        payload,
        stored_at: now,
        ttl,
      },
    );
  }

  pub fn invalidate(&self, key: &str) {
    let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
    entries.remove(key);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;
  use serde_json::json;

  fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
  }

  #[test]
  fn test_hit_within_ttl() {
    let cache = ResponseCache::new();
    cache.put("tools", json!(["a"]), Duration::minutes(15), t0());
    assert_eq!(
      cache.get("tools", t0() + Duration::minutes(14)),
      Some(json!(["a"]))
    );
  }

  #[test]
  fn test_miss_at_and_after_ttl() {
    let cache = ResponseCache::new();
    cache.put("tools", json!(["a"]), Duration::minutes(15), t0());
    assert_eq!(cache.get("tools", t0() + Duration::minutes(15)), None);
    assert_eq!(cache.get("tools", t0() + Duration::hours(1)), None);
  }

  #[test]
  fn test_put_overwrites_and_invalidate_removes() {
    let cache = ResponseCache::new();
    cache.put("tools", json!(["a"]), Duration::minutes(15), t0());
    cache.put("tools", json!(["b"]), Duration::minutes(15), t0());
    assert_eq!(cache.get("tools", t0()), Some(json!(["b"])));

    cache.invalidate("tools");
    assert_eq!(cache.get("tools", t0()), None);
  }
}
