//! Serde types for the backend's response envelope.

use serde::Deserialize;
use serde_json::Value;

/// Every JSON endpoint wraps its payload as `{success, data, message|error}`.
#[derive(Debug, Deserialize)]
pub struct ApiEnvelope {
  pub success: bool,
  #[serde(default)]
  pub data: Option<Value>,
  #[serde(default)]
  pub message: Option<String>,
  #[serde(default)]
  pub error: Option<String>,
}

impl ApiEnvelope {
  /// Human-readable reason the backend gave, if any.
  pub fn reason(&self) -> Option<&str> {
    self.error.as_deref().or(self.message.as_deref())
  }
}

/// Pull a message out of an error body, whatever shape it has.
pub fn error_message(body: &str) -> Option<String> {
  let value: Value = serde_json::from_str(body).ok()?;
  ["error", "message", "detail"]
    .iter()
    .find_map(|field| value.get(field).and_then(Value::as_str))
    .map(String::from)
}
