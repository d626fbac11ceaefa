use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Author of a transcript entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    #[default]
    Agent,
    Tool,
}

/// Message is one entry of a conversation transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,

    /// Set on tool messages: the action call this message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_call_id: Option<String>,
}

impl Message {
    pub fn new_user_text(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: Role::User,
            content: text.into(),
            timestamp: Utc::now(),
            action_call_id: None,
        }
    }

    pub fn new_agent_text(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: Role::Agent,
            content: text.into(),
            timestamp: Utc::now(),
            action_call_id: None,
        }
    }

    pub fn new_tool_result(action_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: Role::Tool,
            content: content.into(),
            timestamp: Utc::now(),
            action_call_id: Some(action_call_id.into()),
        }
    }
}
