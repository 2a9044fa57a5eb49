//! Collapses concurrent identical requests into a single underlying call.

use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

struct InFlight<T> {
  generation: u64,
  /// Weak so that the call is dropped once every waiter has gone away
  future: WeakShared<BoxFuture<'static, T>>,
}

type InFlightMap<T> = Arc<Mutex<HashMap<String, InFlight<T>>>>;

/// Shares one in-flight future per key between every caller that asks for
/// that key while it is outstanding.
pub struct Deduplicator<T: Clone> {
  in_flight: InFlightMap<T>,
  next_generation: Mutex<u64>,
}

/// Removes the map entry for one call when that call settles or is dropped.
struct EntryGuard<T> {
  map: InFlightMap<T>,
  key: String,
  generation: u64,
}

impl<T> Drop for EntryGuard<T> {
  fn drop(&mut self) {
    let mut in_flight = self.map.lock().unwrap_or_else(PoisonError::into_inner);
    if in_flight
      .get(&self.key)
      .is_some_and(|f| f.generation == self.generation)
    {
      in_flight.remove(&self.key);
    }
  }
}

impl<T> Deduplicator<T>
where
  T: Clone + Send + Sync + 'static,
{
  pub fn new() -> Self {
    Self {
      in_flight: Arc::new(Mutex::new(HashMap::new())),
      next_generation: Mutex::new(0),
    }
  }

  /// Run `factory` for `key`, or join the call already in flight for it.
  ///
  /// The record is dropped as soon as the call settles, before any waiter
  /// sees the result, so the next call for `key` always starts fresh. If
  /// every waiter gives up first, the call is cancelled and the record is
  /// dropped with it.
  pub async fn run<F, Fut>(&self, key: &str, factory: F) -> T
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T> + Send + 'static,
  {
    let shared: Shared<BoxFuture<'static, T>> = {
      let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
      match in_flight.get(key).and_then(|f| f.future.upgrade()) {
        Some(existing) => {
          tracing::debug!(%key, "joining in-flight request");
          existing
        }
        None => {
          let generation = self.bump_generation();
          let guard = EntryGuard {
            map: Arc::clone(&self.in_flight),
            key: key.to_string(),
            generation,
          };
          let call = factory();

          let future = async move {
            let _guard = guard;
            call.await
          }
          .boxed()
          .shared();

          if let Some(weak) = future.downgrade() {
            in_flight.insert(
              key.to_string(),
              InFlight {
                generation,
                future: weak,
              },
            );
          }
          future
        }
      }
    };

    shared.await
  }

  /// Number of keys with an outstanding call.
  pub fn in_flight(&self) -> usize {
    self
      .in_flight
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .len()
  }

  fn bump_generation(&self) -> u64 {
    let mut next = self
      .next_generation
      .lock()
      .unwrap_or_else(PoisonError::into_inner);
    *next += 1;
    *next
  }
}

impl<T> Default for Deduplicator<T>
where
  T: Clone + Send + Sync + 'static,
{
  fn default() -> Self {
    Self::new()
  }
}
