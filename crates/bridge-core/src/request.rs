//! Wire payloads accepted by the bridge and their validated forms

use crate::{ActionDeclaration, AgentName, ConversationId, Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// Upper bound on a single user message, in bytes
pub const MAX_MESSAGE_BYTES: usize = 64 * 1024;

/// Body of a turn request as sent by clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnPayload {
    /// Falls back to the bridge's default agent when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    pub conversation_id: String,
    pub message: String,
    #[serde(default)]
    pub declared_actions: Vec<ActionDeclaration>,
    /// Seeds the shared state when the conversation is new; ignored otherwise
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_state: Option<Value>,
}

/// Body used to deliver the result of a UI action
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResultPayload {
    pub conversation_id: String,
    pub action_call_id: String,
    pub result: Value,
}

/// A validated turn request
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub agent: AgentName,
    pub conversation_id: ConversationId,
    pub message: String,
    pub declared_actions: Vec<ActionDeclaration>,
    pub initial_state: Option<Value>,
}

impl TurnRequest {
    pub fn new(
        agent: AgentName,
        conversation_id: ConversationId,
        message: impl Into<String>,
    ) -> Self {
        Self {
            agent,
            conversation_id,
            message: message.into(),
            declared_actions: Vec::new(),
            initial_state: None,
        }
    }

    pub fn with_actions(mut self, actions: Vec<ActionDeclaration>) -> Self {
        self.declared_actions = actions;
        self
    }

    pub fn declared(&self, name: &str) -> Option<&ActionDeclaration> {
        self.declared_actions.iter().find(|a| a.name == name)
    }
}

impl TryFrom<TurnPayload> for TurnRequest {
    type Error = Error;

    fn try_from(payload: TurnPayload) -> Result<Self> {
        Self::from_payload(payload, None)
    }
}

impl TurnRequest {
    /// Validate a client payload, routing it to `default_agent` when it names none
    pub fn from_payload(payload: TurnPayload, default_agent: Option<&AgentName>) -> Result<Self> {
        let agent = match payload.agent_name {
            Some(name) => AgentName::parse(name)?,
            None => default_agent.cloned().ok_or_else(|| {
                Error::bad_request("agentName is required: no default agent is configured")
            })?,
        };
        let conversation_id = ConversationId::parse(payload.conversation_id)?;

        if payload.message.trim().is_empty() {
            return Err(Error::bad_request("message must not be empty"));
        }
        if payload.message.len() > MAX_MESSAGE_BYTES {
            return Err(Error::bad_request(format!(
                "message exceeds {} bytes",
                MAX_MESSAGE_BYTES
            )));
        }

        let mut seen = HashSet::new();
        for action in &payload.declared_actions {
            action.validate()?;
            if !seen.insert(action.name.as_str()) {
                return Err(Error::bad_request(format!(
                    "action '{}' declared twice",
                    action.name
                )));
            }
        }

        if let Some(state) = &payload.initial_state
            && !state.is_object()
        {
            return Err(Error::bad_request("initialState must be a JSON object"));
        }

        Ok(Self {
            agent,
            conversation_id,
            message: payload.message,
            declared_actions: payload.declared_actions,
            initial_state: payload.initial_state,
        })
    }
}
