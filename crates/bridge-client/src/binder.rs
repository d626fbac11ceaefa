use crate::decode::FrameDecoder;
use crate::error::{ClientError, Result};
use bridge_core::{
    ActionDeclaration, ActionResultPayload, AgentName, ConversationId, ErrorKind, Message, Role,
    SharedState, StreamEvent, TurnPayload,
};
use dashmap::DashMap;
use futures::StreamExt;
use serde_json::{Value, json};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::{Mutex, watch};
use url::Url;

/// Type alias for UI action handlers
pub type ActionFn = Arc<
    dyn Fn(Value) -> Pin<Box<dyn Future<Output = bridge_core::Result<Value>> + Send>>
        + Send
        + Sync,
>;

struct RegisteredAction {
    declaration: ActionDeclaration,
    handler: ActionFn,
}

/// How a turn ended
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    Completed,
    /// The turn ended with an error event. What was received before it stays
    /// in the transcript and the live state.
    Failed { kind: ErrorKind, message: String },
}

impl TurnOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, TurnOutcome::Completed)
    }
}

/// Client side of one conversation with an agent behind the bridge.
///
/// Keeps a live projection of the agent's shared state and the transcript,
/// both updated from the relayed events in the order they arrive. Turns are
/// sent one at a time; concurrent [`StateBinder::send_message`] calls wait
/// for each other.
pub struct StateBinder {
    http: reqwest::Client,
    endpoint: Url,
    actions_endpoint: Url,
    agent: AgentName,
    conversation_id: ConversationId,
    initial_state: Value,
    seeded: AtomicBool,
    state: watch::Sender<SharedState>,
    transcript: RwLock<Vec<Message>>,
    actions: DashMap<String, RegisteredAction>,
    turn_lock: Mutex<()>,
}

impl StateBinder {
    /// Bind to `agent_name` through the bridge turn endpoint at `endpoint`
    /// (for instance `http://localhost:3000/api/copilotkit`).
    pub fn subscribe(endpoint: &str, agent_name: &str, initial_state: Value) -> Result<Self> {
        let endpoint = Url::parse(endpoint.trim_end_matches('/')).map_err(|e| {
            bridge_core::Error::config_error(format!("invalid bridge endpoint '{}': {}", endpoint, e))
        })?;
        let actions_endpoint = Url::parse(&format!("{}/actions", endpoint)).map_err(|e| {
            bridge_core::Error::config_error(format!("invalid bridge endpoint '{}': {}", endpoint, e))
        })?;
        let agent = AgentName::parse(agent_name)?;
        let (state, _) = watch::channel(SharedState::new(initial_state.clone()));

        Ok(Self {
            http: reqwest::Client::new(),
            endpoint,
            actions_endpoint,
            agent,
            conversation_id: ConversationId::generate(),
            initial_state,
            seeded: AtomicBool::new(false),
            state,
            transcript: RwLock::new(Vec::new()),
            actions: DashMap::new(),
            turn_lock: Mutex::new(()),
        })
    }

    /// Continue an existing conversation instead of starting a new one
    pub fn with_conversation_id(mut self, conversation_id: ConversationId) -> Self {
        self.conversation_id = conversation_id;
        self
    }

    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    pub fn agent(&self) -> &AgentName {
        &self.agent
    }

    pub fn live_state(&self) -> SharedState {
        self.state.borrow().clone()
    }

    /// Receiver notified on every state change
    pub fn watch(&self) -> watch::Receiver<SharedState> {
        self.state.subscribe()
    }

    pub fn transcript(&self) -> Vec<Message> {
        self.transcript
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Make a UI action available to the agent. Registering the same name
    /// again replaces the previous handler.
    pub fn register_action<F, Fut>(&self, declaration: ActionDeclaration, handler: F) -> Result<()>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bridge_core::Result<Value>> + Send + 'static,
    {
        declaration.validate()?;
        let handler: ActionFn = Arc::new(move |args| Box::pin(handler(args)));
        self.actions.insert(
            declaration.name.clone(),
            RegisteredAction {
                declaration,
                handler,
            },
        );
        Ok(())
    }

    fn declarations(&self) -> Vec<ActionDeclaration> {
        let mut declarations: Vec<ActionDeclaration> = self
            .actions
            .iter()
            .map(|entry| entry.value().declaration.clone())
            .collect();
        declarations.sort_by(|a, b| a.name.cmp(&b.name));
        declarations
    }

    /// Run one turn and apply its events as they arrive
    pub async fn send_message(&self, text: impl Into<String>) -> Result<TurnOutcome> {
        let _turn = self.turn_lock.lock().await;
        let text = text.into();

        let seeding = !self.seeded.load(Ordering::SeqCst);
        let payload = TurnPayload {
            agent_name: Some(self.agent.to_string()),
            conversation_id: self.conversation_id.to_string(),
            message: text.clone(),
            declared_actions: self.declarations(),
            initial_state: seeding.then(|| self.initial_state.clone()),
        };

        let response = self
            .http
            .post(self.endpoint.clone())
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body: Value = response.json().await.unwrap_or(Value::Null);
            return Err(ClientError::Rejected {
                status: status.as_u16(),
                kind: serde_json::from_value(body["kind"].clone()).ok(),
                message: body["error"].as_str().unwrap_or_default().to_string(),
            });
        }

        self.seeded.store(true, Ordering::SeqCst);
        self.write_transcript(|transcript| transcript.push(Message::new_user_text(text)));

        let mut decoder = FrameDecoder::new();
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    return Ok(TurnOutcome::Failed {
                        kind: ErrorKind::StreamError,
                        message: format!("connection to the bridge failed: {}", e),
                    });
                }
            };
            for frame in decoder.push(&chunk) {
                if let Some(outcome) = self.on_frame(frame).await {
                    return Ok(outcome);
                }
            }
        }
        if let Some(frame) = decoder.finish()
            && let Some(outcome) = self.on_frame(frame).await
        {
            return Ok(outcome);
        }

        Ok(TurnOutcome::Failed {
            kind: ErrorKind::StreamError,
            message: "the bridge closed the stream before the turn ended".to_string(),
        })
    }

    async fn on_frame(&self, frame: serde_json::Result<StreamEvent>) -> Option<TurnOutcome> {
        match frame {
            Ok(event) => self.apply(event).await,
            Err(e) => Some(TurnOutcome::Failed {
                kind: ErrorKind::StreamError,
                message: format!("undecodable frame: {}", e),
            }),
        }
    }

    /// Apply one event. Returns the outcome once the turn is over.
    async fn apply(&self, event: StreamEvent) -> Option<TurnOutcome> {
        match event {
            StreamEvent::MessageDelta {
                message_id, delta, ..
            } => {
                self.write_transcript(|transcript| append_delta(transcript, &message_id, &delta));
                None
            }
            StreamEvent::StateSnapshot { .. } | StreamEvent::StateDelta { .. } => {
                let mut failure = None;
                self.state.send_if_modified(|state| match state.apply_event(&event) {
                    Ok(changed) => changed,
                    Err(e) => {
                        failure = Some(e);
                        false
                    }
                });
                failure.map(|e| TurnOutcome::Failed {
                    kind: ErrorKind::StreamError,
                    message: e.to_string(),
                })
            }
            StreamEvent::ActionCall {
                action_call_id,
                name,
                arguments,
            } => {
                self.invoke_action(action_call_id, &name, arguments).await;
                None
            }
            StreamEvent::ActionResult {
                action_call_id,
                result,
            } => {
                self.write_transcript(|transcript| {
                    transcript.push(Message::new_tool_result(action_call_id, result.to_string()))
                });
                None
            }
            StreamEvent::SessionEnd => Some(TurnOutcome::Completed),
            StreamEvent::Error { kind, message } => {
                tracing::warn!(kind = %kind, message = %message, "Turn failed");
                Some(TurnOutcome::Failed { kind, message })
            }
        }
    }

    async fn invoke_action(&self, action_call_id: String, name: &str, arguments: Value) {
        let Some(handler) = self.actions.get(name).map(|entry| entry.handler.clone()) else {
            // Agent-side tool, shown but not ours to answer
            tracing::debug!(action = %name, "Ignoring call of an action not registered here");
            return;
        };

        let result = match handler(arguments).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(action = %name, error = %e, "Action handler failed");
                json!({"error": e.to_string()})
            }
        };

        let payload = ActionResultPayload {
            conversation_id: self.conversation_id.to_string(),
            action_call_id,
            result,
        };
        match self
            .http
            .post(self.actions_endpoint.clone())
            .json(&payload)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => tracing::warn!(
                action = %name,
                status = %response.status(),
                "Bridge did not accept the action result"
            ),
            Err(e) => tracing::warn!(action = %name, error = %e, "Failed to deliver action result"),
        }
    }

    fn write_transcript(&self, f: impl FnOnce(&mut Vec<Message>)) {
        let mut transcript = self.transcript.write().unwrap_or_else(|e| e.into_inner());
        f(&mut transcript);
    }
}

/// Extend the agent message `message_id` or start it
fn append_delta(transcript: &mut Vec<Message>, message_id: &str, delta: &str) {
    let existing = transcript
        .iter_mut()
        .rev()
        .take_while(|m| m.role != Role::User)
        .find(|m| m.role == Role::Agent && m.id == message_id);
    match existing {
        Some(message) => message.content.push_str(delta),
        None => transcript.push(Message::new_agent_text(message_id, delta)),
    }
}
