//! Test doubles for the backend seam.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::backend::{ApiRequest, Backend, CallError};

/// Backend that answers from a script and records every call.
///
/// One-shot responses queued with [`Self::then`] are used first, in order;
/// after that every call gets the default response.
pub struct ScriptedBackend {
  scripted: Mutex<VecDeque<Result<Value, CallError>>>,
  default: Mutex<Result<Value, CallError>>,
  calls: Mutex<Vec<ApiRequest>>,
  delay: Mutex<Duration>,
  healthy: AtomicBool,
}

impl ScriptedBackend {
  pub fn new() -> Self {
    Self {
      scripted: Mutex::new(VecDeque::new()),
      default: Mutex::new(Ok(Value::Null)),
      calls: Mutex::new(Vec::new()),
      delay: Mutex::new(Duration::ZERO),
      healthy: AtomicBool::new(true),
    }
  }

  pub fn respond_with(&self, result: Result<Value, CallError>) {
    *self.default.lock().unwrap() = result;
  }

  pub fn then(&self, result: Result<Value, CallError>) {
    self.scripted.lock().unwrap().push_back(result);
  }

  pub fn set_delay(&self, delay: Duration) {
    *self.delay.lock().unwrap() = delay;
  }

  pub fn set_healthy(&self, healthy: bool) {
    self.healthy.store(healthy, Ordering::SeqCst);
  }

  pub fn call_count(&self) -> usize {
    self.calls.lock().unwrap().len()
  }

  pub fn calls(&self) -> Vec<ApiRequest> {
    self.calls.lock().unwrap().clone()
  }
}

pub fn server_down() -> CallError {
  CallError::ServerUnavailable {
    status: Some(503),
    message: "Service Unavailable".into(),
  }
}

#[async_trait]
impl Backend for ScriptedBackend {
  async fn call(&self, request: ApiRequest) -> Result<Value, CallError> {
    self.calls.lock().unwrap().push(request);
    let delay = *self.delay.lock().unwrap();
    if !delay.is_zero() {
      tokio::time::sleep(delay).await;
    }

    let scripted = self.scripted.lock().unwrap().pop_front();
    match scripted {
      Some(result) => result,
      None => self.default.lock().unwrap().clone(),
    }
  }

  async fn health(&self, _timeout: Duration) -> bool {
    self.healthy.load(Ordering::SeqCst)
  }
}
