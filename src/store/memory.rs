use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::Mutex;

use super::{LocalStore, StoredSnapshot};
use crate::queue::QueuedItem;

/// Store that keeps everything in process memory.
/// Used by `--ephemeral` runs and by tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
  queue: Mutex<Vec<QueuedItem>>,
  snapshots: Mutex<HashMap<String, StoredSnapshot>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

impl LocalStore for MemoryStore {
  fn load_queue(&self) -> Result<Vec<QueuedItem>> {
    let queue = self
      .queue
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(queue.clone())
  }

  fn save_queue(&self, items: &[QueuedItem]) -> Result<()> {
    let mut queue = self
      .queue
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    *queue = items.to_vec();
    Ok(())
  }

  fn load_snapshot(&self, key: &str) -> Result<Option<StoredSnapshot>> {
    let snapshots = self
      .snapshots
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(snapshots.get(key).cloned())
  }

  fn save_snapshot(&self, key: &str, snapshot: &StoredSnapshot) -> Result<()> {
    let mut snapshots = self
      .snapshots
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    snapshots.insert(key.to_string(), snapshot.clone());
    Ok(())
  }

  fn remove_snapshot(&self, key: &str) -> Result<()> {
    let mut snapshots = self
      .snapshots
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    snapshots.remove(key);
    Ok(())
  }
}
