//! Payload shapes the gateway understands.
//!
//! Only the fields the client needs are typed; everything else the backend
//! sends is kept in `extra` untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A tool capability the assistant can invoke
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInfo {
  pub name: String,
  #[serde(default)]
  pub description: Option<String>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

/// Conversation row for list views
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
  pub id: String,
  #[serde(default)]
  pub title: Option<String>,
  #[serde(default)]
  pub updated_at: Option<String>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
  pub role: String,
  pub content: String,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

/// Full conversation with its message history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
  pub id: String,
  #[serde(default)]
  pub title: Option<String>,
  #[serde(default)]
  pub messages: Vec<ChatMessage>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

/// The assistant's answer to a sent message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
  #[serde(default)]
  pub conversation_id: Option<String>,
  #[serde(alias = "content", alias = "message")]
  pub response: String,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}
