use crate::recorder::TurnRecorder;
use crate::registry::RuntimeRegistry;
use async_stream::stream;
use bridge_core::action::skipped_result;
use bridge_core::config::{RetryConfig, TimeoutConfig};
use bridge_core::{
    ActionDeclaration, ActionInvocation, ActionResultPayload, AdapterInput, AdapterRequest,
    AdapterSession, AgentAdapter, AgentName, BridgeConfig, ConversationId, EmptyServiceAdapter,
    Error, ErrorKind, EventStream, Message, Result, ServiceAdapter, StreamEvent, TurnId,
    TurnRequest,
};
use bridge_session::{CreateRequest, SessionService, SessionView};
use bridge_telemetry::{
    ActionSpanAttributes, AdapterSpanAttributes, safe_serialize, trace_action_call,
    trace_adapter_open,
};
use futures::stream::{Stream, StreamExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// An accepted turn: identifiers plus the event stream to relay
pub struct TurnStream {
    pub turn_id: TurnId,
    pub conversation_id: ConversationId,
    /// Whether the session was created by this turn
    pub created: bool,
    pub events: EventStream,
}

/// Runtime owns the registry, the sessions and the policies of one bridge.
///
/// There is no global instance. Whoever serves requests builds one explicitly
/// and shares it, so tests get fully isolated runtimes.
pub struct Runtime {
    registry: RuntimeRegistry,
    sessions: Arc<dyn SessionService>,
    service_adapter: Arc<dyn ServiceAdapter>,
    default_agent: Option<AgentName>,
    timeouts: TimeoutConfig,
    retry: RetryConfig,
}

enum Opened {
    Session(AdapterSession),
    TimedOut,
}

enum Next {
    Event(StreamEvent),
    Ended,
    TimedOut,
    Cancelled,
}

enum ActionWait {
    Received(serde_json::Value),
    TimedOut,
    Cancelled,
}

enum Feed {
    Delivered,
    Closed,
    TimedOut,
    Cancelled,
}

impl Runtime {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    pub fn registry(&self) -> &RuntimeRegistry {
        &self.registry
    }

    pub fn sessions(&self) -> &Arc<dyn SessionService> {
        &self.sessions
    }

    pub fn service_adapter(&self) -> &Arc<dyn ServiceAdapter> {
        &self.service_adapter
    }

    /// Agent serving turns that do not name one
    pub fn default_agent(&self) -> Option<&AgentName> {
        self.default_agent.as_ref()
    }

    /// Start a turn.
    ///
    /// Fails before any event for unknown agents and for agents that stay
    /// unreachable after the configured retries. Waits in line behind any turn
    /// already in flight for the same conversation. Every later failure is
    /// reported as the terminal event of the returned stream.
    pub async fn start_turn(
        &self,
        request: TurnRequest,
        cancel: CancellationToken,
    ) -> Result<TurnStream> {
        let adapter = self.registry.resolve(request.agent.as_str())?;

        let (session, created) = self
            .sessions
            .get_or_create(&CreateRequest {
                conversation_id: request.conversation_id.clone(),
                agent: request.agent.clone(),
                initial_state: request.initial_state.clone(),
            })
            .await?;

        let turn_id = TurnId::new();
        let guard = tokio::select! {
            guard = session.begin_turn(turn_id) => guard,
            _ = cancel.cancelled() => return Err(Error::Cancelled),
        };

        tracing::info!(
            conversation_id = %request.conversation_id,
            turn_id = %turn_id,
            agent = %request.agent,
            protocol = adapter.protocol(),
            new_session = created,
            "Turn started"
        );

        let user_message = Message::new_user_text(request.message);
        let adapter_request = self
            .service_adapter
            .prepare(AdapterRequest {
                turn_id,
                agent: request.agent.clone(),
                conversation_id: request.conversation_id.clone(),
                transcript: session.transcript(),
                message: user_message.clone(),
                state: session.shared_state(),
                declared_actions: request.declared_actions.clone(),
                cancel: cancel.clone(),
            })
            .await?;

        let single = |event: StreamEvent| TurnStream {
            turn_id,
            conversation_id: request.conversation_id.clone(),
            created,
            events: Box::new(futures::stream::iter([event])),
        };

        let opened = self.open(adapter.as_ref(), adapter_request, &cancel).await;
        if let Err(e @ (Error::AdapterUnavailable(_) | Error::Cancelled)) = opened {
            return Err(e);
        }

        // From here the turn is accepted: the client keeps the message even if it fails in-band
        session.append_message(turn_id, user_message)?;

        let adapter_session = match opened {
            Ok(Opened::Session(adapter_session)) => adapter_session,
            Ok(Opened::TimedOut) => {
                tracing::warn!(
                    turn_id = %turn_id,
                    timeout_ms = self.timeouts.adapter_ms,
                    "Agent did not answer in time"
                );
                return Ok(single(StreamEvent::timeout(format!(
                    "agent did not respond within {} ms",
                    self.timeouts.adapter_ms
                ))));
            }
            Err(e) => {
                tracing::error!(turn_id = %turn_id, error = %e, "Failed to open agent stream");
                return Ok(single(StreamEvent::from(&e)));
            }
        };

        let events = relay(
            turn_id,
            request.conversation_id.clone(),
            TurnRecorder::new(guard),
            adapter_session,
            request.declared_actions,
            self.timeouts.clone(),
            cancel,
        );

        Ok(TurnStream {
            turn_id,
            conversation_id: request.conversation_id,
            created,
            events: Box::new(Box::pin(events)),
        })
    }

    async fn open(
        &self,
        adapter: &dyn AgentAdapter,
        request: AdapterRequest,
        cancel: &CancellationToken,
    ) -> Result<Opened> {
        let mut attempt = 1;
        loop {
            let backoff = self.retry.backoff(attempt);
            if !backoff.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                    _ = tokio::time::sleep(backoff) => {}
                }
            }

            let opened = tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                opened = tokio::time::timeout(self.timeouts.adapter(), adapter.open(request.clone())) => opened,
            };

            trace_adapter_open(AdapterSpanAttributes {
                protocol: adapter.protocol().to_string(),
                agent: request.agent.to_string(),
                turn_id: request.turn_id.to_string(),
                conversation_id: request.conversation_id.to_string(),
                attempt,
                outcome: match &opened {
                    Err(_) => ErrorKind::Timeout.to_string(),
                    Ok(Ok(_)) => "opened".to_string(),
                    Ok(Err(e)) => e.kind().to_string(),
                },
            });

            match opened {
                Err(_) => return Ok(Opened::TimedOut),
                Ok(Ok(session)) => return Ok(Opened::Session(session)),
                Ok(Err(e)) if e.is_retryable() && attempt < self.retry.max_attempts => {
                    tracing::warn!(
                        turn_id = %request.turn_id,
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        error = %e,
                        "Agent unavailable, retrying"
                    );
                    attempt += 1;
                }
                Ok(Err(e)) => return Err(e),
            }
        }
    }

    /// Deliver the result of a UI action to the turn waiting for it
    pub async fn resolve_action(&self, payload: ActionResultPayload) -> Result<()> {
        let conversation_id = ConversationId::parse(payload.conversation_id)?;
        let session = self.sessions.get(&conversation_id).await?;
        session.resolve_action(&payload.action_call_id, payload.result)?;
        tracing::debug!(
            conversation_id = %conversation_id,
            action_call_id = %payload.action_call_id,
            "Action result delivered"
        );
        Ok(())
    }

    pub async fn session_view(&self, conversation_id: &ConversationId) -> Result<SessionView> {
        Ok(self.sessions.get(conversation_id).await?.view())
    }
}

fn relay(
    turn_id: TurnId,
    conversation_id: ConversationId,
    mut recorder: TurnRecorder,
    adapter_session: AdapterSession,
    declared: Vec<ActionDeclaration>,
    timeouts: TimeoutConfig,
    cancel: CancellationToken,
) -> impl Stream<Item = StreamEvent> + Send {
    stream! {
        let AdapterSession { mut events, input } = adapter_session;
        let mut relayed = 0usize;

        let terminal = loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => Next::Cancelled,
                next = tokio::time::timeout(timeouts.adapter(), events.next()) => match next {
                    Ok(Some(event)) => Next::Event(event),
                    Ok(None) => Next::Ended,
                    Err(_) => Next::TimedOut,
                },
            };

            let event = match next {
                Next::Event(event) => event,
                Next::Ended => {
                    break StreamEvent::stream_error("agent stream ended without a terminal event");
                }
                Next::TimedOut => {
                    tracing::warn!(turn_id = %turn_id, timeout_ms = timeouts.adapter_ms, "Agent went silent");
                    break StreamEvent::timeout(format!(
                        "no agent event within {} ms",
                        timeouts.adapter_ms
                    ));
                }
                Next::Cancelled => {
                    break StreamEvent::error(ErrorKind::Cancelled, "turn cancelled");
                }
            };

            if event.is_terminal() {
                break event;
            }

            tracing::debug!(turn_id = %turn_id, event = event.type_name(), "Relaying event");

            let mut awaited = None;
            match &event {
                StreamEvent::StateSnapshot { .. } | StreamEvent::StateDelta { .. } => {
                    if let Err(e) = recorder.apply_state(&event) {
                        break StreamEvent::from(&e);
                    }
                }
                StreamEvent::MessageDelta { message_id, delta, .. } => {
                    recorder.push_delta(message_id, delta);
                }
                StreamEvent::ActionResult { action_call_id, result } => {
                    recorder.record_tool_result(action_call_id, result);
                }
                StreamEvent::ActionCall { action_call_id, name, arguments } => {
                    if let Some(declaration) = declared.iter().find(|d| &d.name == name) {
                        let invocation = ActionInvocation {
                            action_call_id: action_call_id.clone(),
                            name: name.clone(),
                            parameters: arguments.clone(),
                            required: declaration.required,
                        };
                        let registered = match recorder.session() {
                            Some(session) => {
                                session.register_pending_action(turn_id, invocation.clone())
                            }
                            None => Err(Error::Cancelled),
                        };
                        match registered {
                            Ok(rx) => awaited = Some((invocation, rx)),
                            Err(e) => break StreamEvent::from(&e),
                        }
                    }
                }
                StreamEvent::SessionEnd | StreamEvent::Error { .. } => {}
            }

            yield event;
            relayed += 1;

            let Some((invocation, rx)) = awaited else {
                continue;
            };

            let wait = tokio::select! {
                biased;
                _ = cancel.cancelled() => ActionWait::Cancelled,
                received = tokio::time::timeout(timeouts.action(), rx) => match received {
                    Ok(Ok(result)) => ActionWait::Received(result),
                    // The pending entry went away without a result
                    Ok(Err(_)) | Err(_) => ActionWait::TimedOut,
                },
            };

            let result = match wait {
                ActionWait::Received(result) => result,
                ActionWait::Cancelled => {
                    break StreamEvent::error(ErrorKind::Cancelled, "turn cancelled");
                }
                ActionWait::TimedOut => {
                    if let Some(session) = recorder.session() {
                        session.discard_pending_action(&invocation.action_call_id);
                    }
                    tracing::warn!(
                        turn_id = %turn_id,
                        action = %invocation.name,
                        action_call_id = %invocation.action_call_id,
                        required = invocation.required,
                        "Action result not received in time"
                    );
                    if invocation.required {
                        break StreamEvent::timeout(format!(
                            "action '{}' was not answered within {} ms",
                            invocation.name, timeouts.action_ms
                        ));
                    }
                    skipped_result("timeout")
                }
            };

            let feed = input.send(AdapterInput::ActionResult {
                action_call_id: invocation.action_call_id.clone(),
                result: result.clone(),
            });
            let fed = tokio::select! {
                biased;
                _ = cancel.cancelled() => Feed::Cancelled,
                fed = tokio::time::timeout(timeouts.action(), feed) => match fed {
                    Ok(Ok(())) => Feed::Delivered,
                    Ok(Err(_)) => Feed::Closed,
                    Err(_) => Feed::TimedOut,
                },
            };
            match fed {
                Feed::Delivered => {}
                Feed::Closed => {
                    tracing::debug!(turn_id = %turn_id, "Agent stopped listening for action results");
                }
                Feed::Cancelled => {
                    break StreamEvent::error(ErrorKind::Cancelled, "turn cancelled");
                }
                Feed::TimedOut => {
                    tracing::warn!(
                        turn_id = %turn_id,
                        action_call_id = %invocation.action_call_id,
                        "Agent did not take the action result in time"
                    );
                    break StreamEvent::timeout(format!(
                        "agent did not accept the result of action '{}' within {} ms",
                        invocation.name, timeouts.action_ms
                    ));
                }
            }

            trace_action_call(ActionSpanAttributes {
                action_name: invocation.name.clone(),
                action_call_id: invocation.action_call_id.clone(),
                turn_id: turn_id.to_string(),
                conversation_id: conversation_id.to_string(),
                required: invocation.required,
                args_json: safe_serialize(&invocation.parameters),
                result_json: safe_serialize(&result),
            });
            recorder.record_tool_result(&invocation.action_call_id, &result);
            yield StreamEvent::ActionResult {
                action_call_id: invocation.action_call_id,
                result,
            };
            relayed += 1;
        };

        recorder.finish();
        // Stop adapters that are still producing for this turn
        cancel.cancel();
        match &terminal {
            StreamEvent::Error { kind, message } => tracing::info!(
                turn_id = %turn_id,
                relayed,
                kind = %kind,
                message = %message,
                "Turn ended with error"
            ),
            _ => tracing::info!(turn_id = %turn_id, relayed, "Turn completed"),
        }
        yield terminal;
    }
}

pub struct RuntimeBuilder {
    registry: Option<RuntimeRegistry>,
    sessions: Option<Arc<dyn SessionService>>,
    service_adapter: Arc<dyn ServiceAdapter>,
    default_agent: Option<String>,
    timeouts: TimeoutConfig,
    retry: RetryConfig,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            registry: None,
            sessions: None,
            service_adapter: Arc::new(EmptyServiceAdapter),
            default_agent: None,
            timeouts: TimeoutConfig::default(),
            retry: RetryConfig::default(),
        }
    }

    pub fn registry(mut self, registry: RuntimeRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn session_service(mut self, service: Arc<dyn SessionService>) -> Self {
        self.sessions = Some(service);
        self
    }

    pub fn service_adapter(mut self, adapter: Arc<dyn ServiceAdapter>) -> Self {
        self.service_adapter = adapter;
        self
    }

    pub fn default_agent(mut self, name: impl Into<String>) -> Self {
        self.default_agent = Some(name.into());
        self
    }

    pub fn timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Take the default agent and the timeout and retry policies from a loaded configuration
    pub fn config(mut self, config: &BridgeConfig) -> Self {
        self.default_agent = config.default_agent.clone();
        self.timeouts(config.timeouts.clone())
            .retry(config.retry.clone())
    }

    pub fn build(self) -> Result<Runtime> {
        let registry = self
            .registry
            .ok_or_else(|| Error::config_error("Runtime registry is required"))?;
        let sessions = self
            .sessions
            .ok_or_else(|| Error::config_error("Session service is required"))?;
        if registry.is_empty() {
            return Err(Error::config_error("at least one agent must be registered"));
        }
        let default_agent = match self.default_agent {
            Some(name) => {
                let name = AgentName::parse(name)?;
                if !registry.contains(name.as_str()) {
                    return Err(Error::config_error(format!(
                        "default agent '{}' is not registered",
                        name
                    )));
                }
                Some(name)
            }
            None => None,
        };

        Ok(Runtime {
            registry,
            sessions,
            service_adapter: self.service_adapter,
            default_agent,
            timeouts: self.timeouts,
            retry: self.retry,
        })
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
