//! Device-local persistence for state that has to survive a restart.
//!
//! Two things live here: the offline queue snapshot and one fallback
//! snapshot per cacheable endpoint. Both carry a format version so a future
//! incompatible shape is discarded instead of misread.

mod memory;
mod sqlite;

use chrono::{DateTime, Utc};
use color_eyre::Result;

use crate::queue::QueuedItem;

pub use memory::MemoryStore;
pub use sqlite::{data_dir, SqliteStore};

/// Current on-disk format version for queue rows and fallback snapshots.
pub const FORMAT_VERSION: &str = "1";

/// A persisted fallback payload.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSnapshot {
  pub payload: serde_json::Value,
  pub stored_at: DateTime<Utc>,
  pub version: String,
}

/// Trait for local persistence backends.
pub trait LocalStore: Send + Sync {
  /// Load the queue in FIFO order. Rows written under another format version are dropped.
  fn load_queue(&self) -> Result<Vec<QueuedItem>>;

  /// Replace the persisted queue with `items`.
  fn save_queue(&self, items: &[QueuedItem]) -> Result<()>;

  /// Get the fallback snapshot stored under `key`.
  fn load_snapshot(&self, key: &str) -> Result<Option<StoredSnapshot>>;

  /// Store (or overwrite) the fallback snapshot for `key`.
  fn save_snapshot(&self, key: &str, snapshot: &StoredSnapshot) -> Result<()>;

  fn remove_snapshot(&self, key: &str) -> Result<()>;
}
