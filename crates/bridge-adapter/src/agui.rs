//! AG-UI protocol types and the mapping onto bridge stream events

use bridge_core::{
    ActionDeclaration, AdapterRequest, Message, PatchOperation, Role, StatePatch, StreamEvent,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Body of an AG-UI run request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunAgentInput {
    pub thread_id: String,
    pub run_id: String,
    pub state: Value,
    pub messages: Vec<AgUiMessage>,
    pub tools: Vec<AgUiTool>,
    pub context: Vec<Value>,
    pub forwarded_props: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgUiMessage {
    pub id: String,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<AgUiToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgUiToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: AgUiFunctionCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgUiFunctionCall {
    pub name: String,
    /// JSON-encoded arguments
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgUiTool {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl From<&ActionDeclaration> for AgUiTool {
    fn from(action: &ActionDeclaration) -> Self {
        Self {
            name: action.name.clone(),
            description: action.description.clone(),
            parameters: action.parameters.clone(),
        }
    }
}

impl From<&Message> for AgUiMessage {
    fn from(message: &Message) -> Self {
        let role = match message.role {
            Role::User => "user",
            Role::Agent => "assistant",
            Role::Tool => "tool",
        };
        Self {
            id: message.id.clone(),
            role: role.to_string(),
            content: Some(message.content.clone()),
            tool_calls: None,
            tool_call_id: message.action_call_id.clone(),
        }
    }
}

impl RunAgentInput {
    pub fn from_request(request: &AdapterRequest) -> Self {
        let messages = request
            .transcript
            .iter()
            .chain(std::iter::once(&request.message))
            .map(AgUiMessage::from)
            .collect();

        Self {
            thread_id: request.conversation_id.to_string(),
            run_id: request.turn_id.to_string(),
            state: request.state.value.clone(),
            messages,
            tools: request.declared_actions.iter().map(AgUiTool::from).collect(),
            context: Vec::new(),
            forwarded_props: json!({}),
        }
    }

    /// Extend the input with the outcome of a finished run so that the agent
    /// can continue after UI actions were answered.
    pub fn continue_with(&mut self, run: RunTranscript, results: &HashMap<String, Value>) {
        self.messages.extend(run.text_messages);

        if !run.calls.is_empty() {
            let tool_calls = run
                .calls
                .iter()
                .map(|call| AgUiToolCall {
                    id: call.id.clone(),
                    kind: "function".to_string(),
                    function: AgUiFunctionCall {
                        name: call.name.clone(),
                        arguments: call.arguments.clone(),
                    },
                })
                .collect();
            self.messages.push(AgUiMessage {
                id: Uuid::new_v4().to_string(),
                role: "assistant".to_string(),
                content: None,
                tool_calls: Some(tool_calls),
                tool_call_id: None,
            });

            for call in &run.calls {
                let content = results
                    .get(&call.id)
                    .map(Value::to_string)
                    .unwrap_or_else(|| "null".to_string());
                self.messages.push(AgUiMessage {
                    id: Uuid::new_v4().to_string(),
                    role: "tool".to_string(),
                    content: Some(content),
                    tool_calls: None,
                    tool_call_id: Some(call.id.clone()),
                });
            }
        }

        self.run_id = Uuid::new_v4().to_string();
    }
}

/// Events emitted by an AG-UI agent
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgUiEvent {
    RunStarted {},
    RunFinished {},
    RunError {
        message: String,
        #[serde(default)]
        code: Option<String>,
    },
    StepStarted {},
    StepFinished {},
    TextMessageStart {
        #[serde(rename = "messageId")]
        message_id: String,
    },
    TextMessageContent {
        #[serde(rename = "messageId")]
        message_id: String,
        delta: String,
    },
    TextMessageEnd {},
    TextMessageChunk {
        #[serde(rename = "messageId", default)]
        message_id: Option<String>,
        #[serde(default)]
        delta: Option<String>,
    },
    ToolCallStart {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "toolCallName")]
        tool_call_name: String,
    },
    ToolCallArgs {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        delta: String,
    },
    ToolCallEnd {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
    },
    ToolCallResult {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        content: Value,
    },
    StateSnapshot {
        snapshot: Value,
    },
    StateDelta {
        delta: Vec<PatchOperation>,
    },
    MessagesSnapshot {},
    Raw {},
    Custom {},
    #[serde(other)]
    Unknown,
}

/// What to do with one decoded AG-UI event
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Emit(StreamEvent),
    Skip,
    RunFinished,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// What a finished run said, needed to start a follow-up run
#[derive(Debug, Default)]
pub struct RunTranscript {
    pub text_messages: Vec<AgUiMessage>,
    /// Calls of UI-declared actions, in emission order
    pub calls: Vec<ToolCall>,
}

/// Stateful translator from AG-UI events to bridge stream events.
///
/// One mapper lives for a whole turn; [`EventMapper::finish_run`] collects
/// what the current run produced when it finishes.
pub struct EventMapper {
    declared: HashSet<String>,
    open_calls: HashMap<String, ToolCall>,
    last_message_id: Option<String>,
    run: RunTranscript,
    text_index: HashMap<String, usize>,
}

impl EventMapper {
    pub fn new(declared: &[ActionDeclaration]) -> Self {
        Self {
            declared: declared.iter().map(|a| a.name.clone()).collect(),
            open_calls: HashMap::new(),
            last_message_id: None,
            run: RunTranscript::default(),
            text_index: HashMap::new(),
        }
    }

    pub fn on_event(&mut self, event: AgUiEvent) -> Step {
        match event {
            AgUiEvent::TextMessageStart { message_id } => {
                self.last_message_id = Some(message_id);
                Step::Skip
            }
            AgUiEvent::TextMessageContent { message_id, delta } => self.text(message_id, delta),
            AgUiEvent::TextMessageChunk { message_id, delta } => {
                let Some(message_id) = message_id.or_else(|| self.last_message_id.clone()) else {
                    return Step::Failed("TEXT_MESSAGE_CHUNK without a message id".to_string());
                };
                self.last_message_id = Some(message_id.clone());
                match delta {
                    Some(delta) => self.text(message_id, delta),
                    None => Step::Skip,
                }
            }
            AgUiEvent::ToolCallStart {
                tool_call_id,
                tool_call_name,
            } => {
                self.open_calls.insert(
                    tool_call_id.clone(),
                    ToolCall {
                        id: tool_call_id,
                        name: tool_call_name,
                        arguments: String::new(),
                    },
                );
                Step::Skip
            }
            AgUiEvent::ToolCallArgs {
                tool_call_id,
                delta,
            } => match self.open_calls.get_mut(&tool_call_id) {
                Some(call) => {
                    call.arguments.push_str(&delta);
                    Step::Skip
                }
                None => Step::Failed(format!("TOOL_CALL_ARGS for unknown call '{}'", tool_call_id)),
            },
            AgUiEvent::ToolCallEnd { tool_call_id } => {
                let Some(call) = self.open_calls.remove(&tool_call_id) else {
                    return Step::Failed(format!(
                        "TOOL_CALL_END for unknown call '{}'",
                        tool_call_id
                    ));
                };
                let arguments = if call.arguments.trim().is_empty() {
                    json!({})
                } else {
                    match serde_json::from_str(&call.arguments) {
                        Ok(value) => value,
                        Err(e) => {
                            return Step::Failed(format!(
                                "arguments of tool call '{}' are not valid JSON: {}",
                                call.id, e
                            ));
                        }
                    }
                };
                let event = StreamEvent::ActionCall {
                    action_call_id: call.id.clone(),
                    name: call.name.clone(),
                    arguments,
                };
                if self.declared.contains(&call.name) {
                    self.run.calls.push(call);
                }
                Step::Emit(event)
            }
            AgUiEvent::ToolCallResult {
                tool_call_id,
                content,
            } => {
                // Agents usually send the result as a JSON-encoded string
                let result = match content {
                    Value::String(text) => serde_json::from_str(&text).unwrap_or(Value::String(text)),
                    other => other,
                };
                Step::Emit(StreamEvent::ActionResult {
                    action_call_id: tool_call_id,
                    result,
                })
            }
            AgUiEvent::StateSnapshot { snapshot } => {
                Step::Emit(StreamEvent::StateSnapshot { snapshot })
            }
            AgUiEvent::StateDelta { delta } => Step::Emit(StreamEvent::StateDelta {
                delta: StatePatch::Operations(delta),
            }),
            AgUiEvent::RunFinished {} => Step::RunFinished,
            AgUiEvent::RunError { message, code } => Step::Failed(match code {
                Some(code) => format!("agent run failed ({}): {}", code, message),
                None => format!("agent run failed: {}", message),
            }),
            AgUiEvent::RunStarted {}
            | AgUiEvent::StepStarted {}
            | AgUiEvent::StepFinished {}
            | AgUiEvent::TextMessageEnd {}
            | AgUiEvent::MessagesSnapshot {}
            | AgUiEvent::Raw {}
            | AgUiEvent::Custom {}
            | AgUiEvent::Unknown => Step::Skip,
        }
    }

    fn text(&mut self, message_id: String, delta: String) -> Step {
        match self.text_index.get(&message_id) {
            Some(&idx) => {
                if let Some(content) = self.run.text_messages[idx].content.as_mut() {
                    content.push_str(&delta);
                }
            }
            None => {
                self.text_index
                    .insert(message_id.clone(), self.run.text_messages.len());
                self.run.text_messages.push(AgUiMessage {
                    id: message_id.clone(),
                    role: "assistant".to_string(),
                    content: Some(delta.clone()),
                    tool_calls: None,
                    tool_call_id: None,
                });
            }
        }
        Step::Emit(StreamEvent::MessageDelta {
            message_id,
            role: Role::Agent,
            delta,
        })
    }

    /// Take what the finished run produced and reset for the next run
    pub fn finish_run(&mut self) -> RunTranscript {
        self.open_calls.clear();
        self.text_index.clear();
        self.last_message_id = None;
        std::mem::take(&mut self.run)
    }
}

/// Decode the data field of one SSE frame
pub fn decode_event(data: &str) -> serde_json::Result<AgUiEvent> {
    serde_json::from_str(data)
}
