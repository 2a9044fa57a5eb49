//! SQLite implementation of [`LocalStore`].

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{LocalStore, StoredSnapshot, FORMAT_VERSION};
use crate::queue::QueuedItem;

/// SQLite-backed local state.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open the store at the default location.
  pub fn open() -> Result<Self> {
    let path = Self::default_path()?;
    Self::open_at(&path)
  }

  /// Open (or create) the store at `path`.
  pub fn open_at(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create state directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open state database at {}: {}", path.display(), e))?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    Ok(data_dir()?.join("state.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(SCHEMA)
      .map_err(|e| eyre!("Failed to run state migrations: {}", e))?;

    Ok(())
  }
}

/// Directory holding socgate's state and log files.
pub fn data_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;

  Ok(data_dir.join("socgate"))
}

const SCHEMA: &str = r#"
-- Messages written while offline, replayed in position order
CREATE TABLE IF NOT EXISTS offline_queue (
    position INTEGER PRIMARY KEY,
    id TEXT NOT NULL UNIQUE,
    content TEXT NOT NULL,
    conversation_id TEXT,
    created_at TEXT NOT NULL,
    version TEXT NOT NULL
);

-- Last good payload per cache key, served during outages
CREATE TABLE IF NOT EXISTS fallback_snapshots (
    cache_key TEXT PRIMARY KEY,
    data BLOB NOT NULL,
    stored_at TEXT NOT NULL,
    version TEXT NOT NULL
);
"#;

impl LocalStore for SqliteStore {
  fn load_queue(&self) -> Result<Vec<QueuedItem>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT id, content, conversation_id, created_at, version FROM offline_queue
         ORDER BY position",
      )
      .map_err(|e| eyre!("Failed to prepare queue query: {}", e))?;

    let rows: Vec<(String, String, Option<String>, String, String)> = stmt
      .query_map([], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
      })
      .map_err(|e| eyre!("Failed to query offline queue: {}", e))?
      .collect::<rusqlite::Result<_>>()
      .map_err(|e| eyre!("Failed to read offline queue row: {}", e))?;

    let mut items = Vec::with_capacity(rows.len());
    for (id, content, conversation_id, created_at, version) in rows {
      if version != FORMAT_VERSION {
        tracing::warn!(%id, %version, "discarding queued message with unknown format version");
        continue;
      }
      items.push(QueuedItem {
        id,
        content,
        conversation_id,
        created_at: parse_datetime(&created_at)?,
      });
    }

    Ok(items)
  }

  fn save_queue(&self, items: &[QueuedItem]) -> Result<()> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM offline_queue", [])
      .map_err(|e| eyre!("Failed to clear offline queue: {}", e))?;

    for (position, item) in items.iter().enumerate() {
      tx.execute(
        "INSERT INTO offline_queue (position, id, content, conversation_id, created_at, version)
         VALUES (?, ?, ?, ?, ?, ?)",
        params![
          position as i64,
          item.id,
          item.content,
          item.conversation_id,
          item.created_at.to_rfc3339(),
          FORMAT_VERSION
        ],
      )
      .map_err(|e| eyre!("Failed to store queued message: {}", e))?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn load_snapshot(&self, key: &str) -> Result<Option<StoredSnapshot>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let row: Option<(Vec<u8>, String, String)> = conn
      .query_row(
        "SELECT data, stored_at, version FROM fallback_snapshots WHERE cache_key = ?",
        params![key],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query fallback snapshot: {}", e))?;

    match row {
      Some((data, stored_at, version)) => {
        let payload = serde_json::from_slice(&data)
          .map_err(|e| eyre!("Failed to deserialize fallback snapshot: {}", e))?;
        Ok(Some(StoredSnapshot {
          payload,
          stored_at: parse_datetime(&stored_at)?,
          version,
        }))
      }
      None => Ok(None),
    }
  }

  fn save_snapshot(&self, key: &str, snapshot: &StoredSnapshot) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let data = serde_json::to_vec(&snapshot.payload)
      .map_err(|e| eyre!("Failed to serialize fallback snapshot: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO fallback_snapshots (cache_key, data, stored_at, version)
         VALUES (?, ?, ?, ?)",
        params![key, data, snapshot.stored_at.to_rfc3339(), snapshot.version],
      )
      .map_err(|e| eyre!("Failed to store fallback snapshot: {}", e))?;

    Ok(())
  }

  fn remove_snapshot(&self, key: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "DELETE FROM fallback_snapshots WHERE cache_key = ?",
        params![key],
      )
      .map_err(|e| eyre!("Failed to remove fallback snapshot: {}", e))?;

    Ok(())
  }
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  fn item(id: &str, content: &str) -> QueuedItem {
    QueuedItem {
      id: id.to_string(),
      content: content.to_string(),
      conversation_id: Some("conv-1".to_string()),
      created_at: Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
    }
  }

  #[test]
  fn test_queue_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.db");

    {
      let store = SqliteStore::open_at(&path).unwrap();
      store
        .save_queue(&[item("a", "first"), item("b", "second")])
        .unwrap();
    }

    let store = SqliteStore::open_at(&path).unwrap();
    let items = store.load_queue().unwrap();
    assert_eq!(items, vec![item("a", "first"), item("b", "second")]);
  }

  #[test]
  fn test_save_queue_replaces_previous_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::open_at(&dir.path().join("state.db")).unwrap();

    store
      .save_queue(&[item("a", "first"), item("b", "second")])
      .unwrap();
    store.save_queue(&[item("b", "second")]).unwrap();

    assert_eq!(store.load_queue().unwrap(), vec![item("b", "second")]);
  }

  #[test]
  fn test_queue_rows_with_unknown_version_are_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::open_at(&dir.path().join("state.db")).unwrap();
    store.save_queue(&[item("a", "first")]).unwrap();

    store
      .conn
      .lock()
      .unwrap()
      .execute(
        "INSERT INTO offline_queue (position, id, content, conversation_id, created_at, version)
         VALUES (5, 'z', 'future', NULL, '2025-03-01T12:00:00+00:00', '99')",
        [],
      )
      .unwrap();

    let items = store.load_queue().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, "a");
  }

  #[test]
  fn test_snapshot_roundtrip_and_remove() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::open_at(&dir.path().join("state.db")).unwrap();
    let snapshot = StoredSnapshot {
      payload: serde_json::json!([{"name": "virustotal_lookup"}]),
      stored_at: Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
      version: FORMAT_VERSION.to_string(),
    };

    assert!(store.load_snapshot("tools").unwrap().is_none());
    store.save_snapshot("tools", &snapshot).unwrap();
    assert_eq!(store.load_snapshot("tools").unwrap(), Some(snapshot));

    store.remove_snapshot("tools").unwrap();
    assert!(store.load_snapshot("tools").unwrap().is_none());
  }

  #[test]
  fn test_snapshot_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.db");
    let snapshot = StoredSnapshot {
      payload: serde_json::json!([{"id": "c1", "title": "Phishing triage"}]),
      stored_at: Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
      version: FORMAT_VERSION.to_string(),
    };

    {
      let store = SqliteStore::open_at(&path).unwrap();
      store.save_snapshot("conversations", &snapshot).unwrap();
    }

    let store = SqliteStore::open_at(&path).unwrap();
    assert_eq!(store.load_snapshot("conversations").unwrap(), Some(snapshot));
  }
}
