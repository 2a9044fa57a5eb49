//! Network reachability tracking and transition notifications.
//!
//! The monitor holds a single online flag. Whatever watches the environment
//! (see [`probe`]) reports into [`ConnectivityMonitor::set_online`]; everything
//! else either reads the flag or subscribes to changes.

pub mod probe;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::Notify;

type Callback = Arc<dyn Fn(bool) + Send + Sync>;

#[derive(Default)]
struct Subscribers {
  entries: Mutex<Vec<(u64, Callback)>>,
  next_id: AtomicU64,
}

pub struct ConnectivityMonitor {
  online: AtomicBool,
  subscribers: Arc<Subscribers>,
  reconnected: Notify,
}

impl ConnectivityMonitor {
  pub fn new(initially_online: bool) -> Self {
    Self {
      online: AtomicBool::new(initially_online),
      subscribers: Arc::new(Subscribers::default()),
      reconnected: Notify::new(),
    }
  }

  pub fn is_online(&self) -> bool {
    self.online.load(Ordering::Acquire)
  }

  /// Register `callback` to be told about every transition.
  pub fn subscribe<F>(&self, callback: F) -> Subscription
  where
    F: Fn(bool) + Send + Sync + 'static,
  {
    let id = self.subscribers.next_id.fetch_add(1, Ordering::Relaxed);
    self
      .subscribers
      .entries
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .push((id, Arc::new(callback)));

    Subscription {
      id,
      subscribers: Arc::downgrade(&self.subscribers),
    }
  }

  /// Record a reachability signal from the environment.
  ///
  /// Only changes are published. Subscribers run synchronously in the order
  /// they subscribed. Going from offline to online also leaves a drain
  /// permit for [`Self::reconnected`].
  pub fn set_online(&self, online: bool) {
    let previous = self.online.swap(online, Ordering::AcqRel);
    if previous == online {
      return;
    }

    if online {
      tracing::info!("connectivity restored");
    } else {
      tracing::warn!("connectivity lost");
    }

    // Snapshot so callbacks may subscribe or unsubscribe without deadlocking
    let callbacks: Vec<Callback> = self
      .subscribers
      .entries
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .iter()
      .map(|(_, cb)| Arc::clone(cb))
      .collect();
    for callback in callbacks {
      callback(online);
    }

    if online {
      self.reconnected.notify_one();
    }
  }

  /// Resolves after the next offline-to-online transition (or immediately if
  /// one happened since the last wait).
  pub async fn reconnected(&self) {
    self.reconnected.notified().await;
  }

  #[cfg(test)]
  pub fn subscriber_count(&self) -> usize {
    self
      .subscribers
      .entries
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .len()
  }
}

/// Handle for removing a subscription. Dropping it leaves the subscription active.
#[derive(Debug)]
pub struct Subscription {
  id: u64,
  subscribers: Weak<Subscribers>,
}

impl Subscription {
  pub fn unsubscribe(self) {
    if let Some(subscribers) = self.subscribers.upgrade() {
      subscribers
        .entries
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .retain(|(id, _)| *id != self.id);
    }
  }
}

impl std::fmt::Debug for Subscribers {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Subscribers").finish_non_exhaustive()
  }
}
