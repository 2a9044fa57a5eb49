//! Transport to the chat/tools backend.

pub mod api_types;
mod error;
mod http;

use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

pub use error::{CallError, FailureKind};
pub use http::HttpBackend;

/// Group of endpoints that share one circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointFamily {
  Chat,
  Tools,
  Conversations,
  Memory,
}

impl EndpointFamily {
  pub const ALL: [EndpointFamily; 4] = [Self::Chat, Self::Tools, Self::Conversations, Self::Memory];

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Chat => "chat",
      Self::Tools => "tools",
      Self::Conversations => "conversations",
      Self::Memory => "memory",
    }
  }
}

/// One request to the backend.
#[derive(Debug, Clone)]
pub struct ApiRequest {
  pub method: Method,
  /// Path relative to the backend base URL
  pub path: String,
  pub body: Option<Value>,
  /// Upper bound on the whole call
  pub timeout: Duration,
}

impl ApiRequest {
  pub fn get(path: impl Into<String>, timeout: Duration) -> Self {
    Self {
      method: Method::GET,
      path: path.into(),
      body: None,
      timeout,
    }
  }

  pub fn post(path: impl Into<String>, body: Value, timeout: Duration) -> Self {
    Self {
      method: Method::POST,
      path: path.into(),
      body: Some(body),
      timeout,
    }
  }

  pub fn patch(path: impl Into<String>, body: Value, timeout: Duration) -> Self {
    Self {
      method: Method::PATCH,
      path: path.into(),
      body: Some(body),
      timeout,
    }
  }
}

/// Anything that can carry an [`ApiRequest`] to the backend.
///
/// Implementations classify every failure into a [`CallError`] and return
/// the envelope's `data` on success.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
  async fn call(&self, request: ApiRequest) -> Result<Value, CallError>;

  /// Cheap reachability check.
  async fn health(&self, timeout: Duration) -> bool;
}
