use bridge_core::{AgentName, ConversationId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRequest {
    pub conversation_id: ConversationId,
    pub agent: AgentName,
    /// Shared state a new session starts from
    pub initial_state: Option<Value>,
}

/// Read-only copy of a session, safe to hand out to other layers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub conversation_id: ConversationId,
    pub agent_name: AgentName,
    pub transcript: Vec<bridge_core::Message>,
    pub shared_state: bridge_core::SharedState,
    pub pending_actions: Vec<bridge_core::ActionInvocation>,
    pub busy: bool,
}
