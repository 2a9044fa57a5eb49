//! Environment listener that turns backend health checks into reachability signals.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use super::ConnectivityMonitor;
use crate::backend::Backend;

/// Periodically checks the backend's health endpoint and reports the result
/// to a [`ConnectivityMonitor`].
#[derive(Clone)]
pub struct HealthProbe {
  backend: Arc<dyn Backend>,
  monitor: Arc<ConnectivityMonitor>,
  interval: Duration,
  timeout: Duration,
}

impl HealthProbe {
  pub fn new(
    backend: Arc<dyn Backend>,
    monitor: Arc<ConnectivityMonitor>,
    interval: Duration,
    timeout: Duration,
  ) -> Self {
    Self {
      backend,
      monitor,
      interval,
      timeout,
    }
  }

  /// Run a single check and publish the result.
  pub async fn check_once(&self) -> bool {
    let reachable = self.backend.health(self.timeout).await;
    self.monitor.set_online(reachable);
    reachable
  }

  /// Check on every tick until the returned task is aborted.
  pub fn spawn(self) -> JoinHandle<()> {
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(self.interval);
      ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
      loop {
        ticker.tick().await;
        self.check_once().await;
      }
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::gateway::testing::ScriptedBackend;

  fn probe(backend: Arc<ScriptedBackend>, monitor: Arc<ConnectivityMonitor>) -> HealthProbe {
    HealthProbe::new(
      backend,
      monitor,
      Duration::from_millis(10),
      Duration::from_millis(50),
    )
  }

  #[tokio::test]
  async fn test_check_once_publishes_result() {
    let backend = Arc::new(ScriptedBackend::new());
    let monitor = Arc::new(ConnectivityMonitor::new(true));
    let probe = probe(backend.clone(), monitor.clone());

    backend.set_healthy(false);
    assert!(!probe.check_once().await);
    assert!(!monitor.is_online());

    backend.set_healthy(true);
    assert!(probe.check_once().await);
    assert!(monitor.is_online());
  }

  #[tokio::test]
  async fn test_spawned_probe_detects_recovery() {
    let backend = Arc::new(ScriptedBackend::new());
    backend.set_healthy(false);
    let monitor = Arc::new(ConnectivityMonitor::new(true));
    let handle = probe(backend.clone(), monitor.clone()).spawn();

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(!monitor.is_online());

    backend.set_healthy(true);
    tokio::time::timeout(Duration::from_secs(1), monitor.reconnected())
      .await
      .expect("probe should report recovery");
    assert!(monitor.is_online());

    handle.abort();
  }
}
