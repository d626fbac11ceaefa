use bridge_core::{AgentName, ErrorKind, TurnId};
use serde::{Deserialize, Serialize};

/// Content type of turn responses
pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// Response header carrying the id of the turn being streamed
pub const TURN_ID_HEADER: &str = "x-turn-id";

/// Response header carrying the conversation id of the turn
pub const CONVERSATION_ID_HEADER: &str = "x-conversation-id";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub kind: ErrorKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionAccepted {
    pub action_call_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnCancelled {
    pub turn_id: TurnId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessResponse {
    pub status: String,
    pub agents: Vec<AgentName>,
    pub sessions: usize,
    pub active_turns: usize,
}
