//! Core traits and types for the advisor bridge
//!
//! This crate holds the data model shared by every layer of the bridge: the
//! stream event vocabulary, the transcript, the shared-state reducer, the
//! adapter contracts and the configuration.

pub mod action;
pub mod config;
pub mod error;
pub mod event;
pub mod ids;
pub mod message;
pub mod request;
pub mod state;
pub mod traits;

// Re-exports
pub use action::{ActionDeclaration, ActionInvocation};
pub use config::{AgentRegistration, BridgeConfig};
pub use error::{Error, ErrorKind, Result};
pub use event::StreamEvent;
pub use ids::{AgentName, ConversationId, TurnId};
pub use message::{Message, Role};
pub use request::{ActionResultPayload, TurnPayload, TurnRequest};
pub use state::{PatchOperation, STATE_SCHEMA_VERSION, SharedState, StatePatch};
pub use traits::{
    AdapterInput, AdapterRequest, AdapterSession, AgentAdapter, EmptyServiceAdapter, EventStream,
    ServiceAdapter,
};
