//! Durable FIFO of chat messages written while the backend was unreachable.
//!
//! Every mutation is persisted before it returns, so a crash never loses a
//! queued message. Replay stops at the first failed send and leaves the rest
//! in place for the next reconnection; a user's messages are never reordered.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::store::LocalStore;

/// A message waiting to be sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedItem {
  /// Unique id; also sent as the client message id so the backend can drop replays.
  pub id: String,
  pub content: String,
  pub conversation_id: Option<String>,
  pub created_at: DateTime<Utc>,
}

impl QueuedItem {
  pub fn new(content: String, conversation_id: Option<String>, created_at: DateTime<Utc>) -> Self {
    Self {
      id: uuid::Uuid::new_v4().to_string(),
      content,
      conversation_id,
      created_at,
    }
  }
}

/// Result of one drain pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
  /// Items sent and removed during this pass
  pub processed: usize,
  /// Items still queued afterwards
  pub remaining: usize,
  /// Why the pass stopped early, if it did
  pub stopped_on: Option<String>,
}

pub struct OfflineQueue {
  store: Arc<dyn LocalStore>,
  items: Mutex<VecDeque<QueuedItem>>,
  draining: AtomicBool,
}

impl OfflineQueue {
  /// Create a queue seeded from whatever the store already holds.
  pub fn load(store: Arc<dyn LocalStore>) -> Result<Self> {
    let items: VecDeque<QueuedItem> = store.load_queue()?.into();
    if !items.is_empty() {
      tracing::info!(pending = items.len(), "restored offline queue");
    }

    Ok(Self {
      store,
      items: Mutex::new(items),
      draining: AtomicBool::new(false),
    })
  }

  /// Append an item and persist the whole queue before returning.
  ///
  /// If the write fails the item is not kept in memory either.
  pub fn enqueue(&self, item: QueuedItem) -> Result<()> {
    let mut items = self.lock()?;
    items.push_back(item);

    let snapshot: Vec<QueuedItem> = items.iter().cloned().collect();
    if let Err(e) = self.store.save_queue(&snapshot) {
      items.pop_back();
      return Err(e);
    }

    tracing::debug!(pending = items.len(), "queued message for later delivery");
    Ok(())
  }

  /// Replay queued items in order through `sender`.
  ///
  /// Each item is removed (and the removal persisted) only after `sender`
  /// succeeds. The first failure ends the pass. If another drain is already
  /// running this returns immediately with nothing processed.
  pub async fn drain<F, Fut, E>(&self, mut sender: F) -> DrainReport
  where
    F: FnMut(QueuedItem) -> Fut,
    Fut: Future<Output = std::result::Result<(), E>>,
    E: Display,
  {
    let Some(_guard) = DrainGuard::acquire(&self.draining) else {
      tracing::debug!("drain already in progress");
      return DrainReport {
        remaining: self.len(),
        ..DrainReport::default()
      };
    };

    let mut report = DrainReport::default();

    loop {
      let front = match self.lock() {
        Ok(items) => items.front().cloned(),
        Err(e) => {
          report.stopped_on = Some(e.to_string());
          break;
        }
      };
      let Some(item) = front else {
        break;
      };

      let id = item.id.clone();
      if let Err(e) = sender(item).await {
        tracing::warn!(%id, error = %e, "replay failed, leaving remaining messages queued");
        report.stopped_on = Some(e.to_string());
        break;
      }

      if let Err(e) = self.remove(&id) {
        tracing::error!(%id, error = %e, "sent message could not be removed from the queue");
        report.stopped_on = Some(e.to_string());
        break;
      }
      report.processed += 1;
    }

    report.remaining = self.len();
    if report.processed > 0 {
      tracing::info!(
        processed = report.processed,
        remaining = report.remaining,
        "offline queue drained"
      );
    }
    report
  }

  /// Pending items in FIFO order.
  pub fn items(&self) -> Vec<QueuedItem> {
    self
      .lock()
      .map(|items| items.iter().cloned().collect())
      .unwrap_or_default()
  }

  pub fn len(&self) -> usize {
    self.lock().map(|items| items.len()).unwrap_or(0)
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  fn remove(&self, id: &str) -> Result<()> {
    let mut items = self.lock()?;
    let Some(position) = items.iter().position(|i| i.id == id) else {
      return Ok(());
    };
    let removed = items.remove(position);

    let snapshot: Vec<QueuedItem> = items.iter().cloned().collect();
    if let Err(e) = self.store.save_queue(&snapshot) {
      if let Some(item) = removed {
        items.insert(position, item);
      }
      return Err(e);
    }
    Ok(())
  }

  fn lock(&self) -> Result<MutexGuard<'_, VecDeque<QueuedItem>>> {
    self
      .items
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

/// Clears the draining flag even if the drain future is dropped mid-pass.
struct DrainGuard<'a>(&'a AtomicBool);

impl<'a> DrainGuard<'a> {
  fn acquire(flag: &'a AtomicBool) -> Option<Self> {
    flag
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .ok()
      .map(|_| Self(flag))
  }
}

impl Drop for DrainGuard<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::Release);
  }
}
