use crate::{
    ActionDeclaration, AgentName, ConversationId, Message, Result, SharedState, StreamEvent,
    TurnId,
};
use async_trait::async_trait;
use futures::stream::Stream;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Stream of events produced by one adapter session
pub type EventStream = Box<dyn Stream<Item = StreamEvent> + Send + Unpin>;

/// Everything an adapter needs to run one turn against its agent
#[derive(Debug, Clone)]
pub struct AdapterRequest {
    pub turn_id: TurnId,
    pub agent: AgentName,
    pub conversation_id: ConversationId,
    /// Transcript before this turn
    pub transcript: Vec<Message>,
    /// The new user message
    pub message: Message,
    /// Current projection of the shared state
    pub state: SharedState,
    pub declared_actions: Vec<ActionDeclaration>,
    /// Cancelled when the turn is abandoned; adapters that spawn work must honor it
    pub cancel: CancellationToken,
}

/// Input fed back into a running adapter session
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterInput {
    ActionResult { action_call_id: String, result: Value },
}

/// An open conversation with an agent: its output events plus an input channel
pub struct AdapterSession {
    pub events: EventStream,
    pub input: mpsc::Sender<AdapterInput>,
}

impl AdapterSession {
    pub fn new(events: EventStream, input: mpsc::Sender<AdapterInput>) -> Self {
        Self { events, input }
    }
}

/// AgentAdapter - translates turns into one agent's wire protocol
#[async_trait]
pub trait AgentAdapter: Send + Sync {
    /// Name of the protocol spoken by this adapter
    fn protocol(&self) -> &str;

    /// Network endpoint of the agent, if any
    fn endpoint(&self) -> Option<&str> {
        None
    }

    /// Opens a turn against the agent.
    ///
    /// Fails with [`crate::Error::AdapterUnavailable`] when the agent cannot be
    /// reached before any event is produced. Failures after that point are
    /// reported in-band as a terminal [`StreamEvent::Error`].
    async fn open(&self, request: AdapterRequest) -> Result<AdapterSession>;
}

/// ServiceAdapter - the model-adapter seam of the runtime.
///
/// A service adapter may rewrite a turn before it reaches the agent adapter,
/// for instance to call a language model directly. Multi-agent delegation
/// does not need one, which is what [`EmptyServiceAdapter`] is for.
#[async_trait]
pub trait ServiceAdapter: Send + Sync {
    fn name(&self) -> &str;

    async fn prepare(&self, request: AdapterRequest) -> Result<AdapterRequest>;
}

/// Pass-through service adapter
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyServiceAdapter;

#[async_trait]
impl ServiceAdapter for EmptyServiceAdapter {
    fn name(&self) -> &str {
        "empty"
    }

    async fn prepare(&self, request: AdapterRequest) -> Result<AdapterRequest> {
        Ok(request)
    }
}
