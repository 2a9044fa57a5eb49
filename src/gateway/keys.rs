//! Request identities used for caching and deduplication.

use sha2::{Digest, Sha256};

use crate::backend::EndpointFamily;

/// Identity of a gateway request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RequestKey {
  /// List of tool capabilities
  Tools,
  /// List of conversations
  Conversations,
  /// A single conversation with messages
  Conversation { id: String },
  /// Sending one chat message, identified by its client message id
  Message { client_id: String },
  /// Metadata update for a conversation
  UpdateConversation { id: String, patch: String },
  /// Clearing assistant memory for a session
  ClearMemory { session: Option<String> },
}

impl RequestKey {
  /// Stable fixed-length key for cache and in-flight maps.
  pub fn cache_hash(&self) -> String {
    let input = match self {
      Self::Tools => "tools".to_string(),
      Self::Conversations => "conversations".to_string(),
      Self::Conversation { id } => format!("conversation:{}", id),
      Self::Message { client_id } => format!("message:{}", client_id),
      Self::UpdateConversation { id, patch } => format!("update_conversation:{}:{}", id, patch),
      Self::ClearMemory { session } => {
        format!("clear_memory:{}", session.as_deref().unwrap_or(""))
      }
    };

    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
  }

  pub fn family(&self) -> EndpointFamily {
    match self {
      Self::Tools => EndpointFamily::Tools,
      Self::Conversations | Self::Conversation { .. } | Self::UpdateConversation { .. } => {
        EndpointFamily::Conversations
      }
      Self::Message { .. } => EndpointFamily::Chat,
      Self::ClearMemory { .. } => EndpointFamily::Memory,
    }
  }

  pub fn description(&self) -> String {
    match self {
      Self::Tools => "available tools".to_string(),
      Self::Conversations => "conversation list".to_string(),
      Self::Conversation { id } => format!("conversation {}", id),
      Self::Message { client_id } => format!("message {}", client_id),
      Self::UpdateConversation { id, .. } => format!("update of conversation {}", id),
      Self::ClearMemory { session } => match session {
        Some(s) => format!("memory clear for session {}", s),
        None => "memory clear".to_string(),
      },
    }
  }
}
