//! Message types exchanged between the hosting runtime and the coordinator.

use serde::{Deserialize, Serialize};

/// Role of a message sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    Tool,
}

/// A message passed to or from the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    /// Unique message ID
    pub id: String,

    /// Role of the sender
    pub role: MessageRole,

    /// Message content
    pub content: String,

    /// Source agent (if from an agent)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_agent: Option<String>,

    /// Session the message belongs to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// Timestamp (Unix millis)
    pub timestamp: u64,

    /// Optional metadata
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
}

impl AgentMessage {
    fn with_role(role: MessageRole, content: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content,
            source_agent: None,
            session_id: None,
            timestamp: now_millis(),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::User, content.into())
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::System, content.into())
    }

    pub fn from_agent(agent: impl Into<String>, content: impl Into<String>) -> Self {
        let mut message = Self::with_role(MessageRole::Assistant, content.into());
        message.source_agent = Some(agent.into());
        message
    }

    pub fn in_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

fn now_millis() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
