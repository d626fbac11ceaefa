//! # Bridge Telemetry
//!
//! OpenTelemetry integration for the advisor bridge.
//!
//! Sets up structured logging plus an OpenTelemetry tracer, and records spans
//! for agent stream opens and UI action round trips so that a turn can be
//! followed from the client request down to the agent.

mod spans;
mod tracer;

pub use spans::{
    ActionSpanAttributes, AdapterSpanAttributes, safe_serialize, trace_action_call,
    trace_adapter_open,
};
pub use tracer::{init_telemetry, register_span_processor, tracer_provider};

/// Span attribute names used by the bridge
pub mod attributes {
    pub const BRIDGE_OPERATION_NAME: &str = "bridge.operation.name";
    pub const BRIDGE_SYSTEM: &str = "bridge.system";

    // Turn attributes
    pub const BRIDGE_TURN_ID: &str = "bridge.turn.id";
    pub const BRIDGE_CONVERSATION_ID: &str = "bridge.conversation.id";
    pub const BRIDGE_AGENT_NAME: &str = "bridge.agent.name";

    // Adapter attributes
    pub const BRIDGE_ADAPTER_PROTOCOL: &str = "bridge.adapter.protocol";
    pub const BRIDGE_ADAPTER_ATTEMPT: &str = "bridge.adapter.attempt";
    pub const BRIDGE_ADAPTER_OUTCOME: &str = "bridge.adapter.outcome";

    // Action attributes
    pub const BRIDGE_ACTION_NAME: &str = "bridge.action.name";
    pub const BRIDGE_ACTION_CALL_ID: &str = "bridge.action.call_id";
    pub const BRIDGE_ACTION_REQUIRED: &str = "bridge.action.required";
    pub const BRIDGE_ACTION_ARGS: &str = "bridge.action.args";
    pub const BRIDGE_ACTION_RESULT: &str = "bridge.action.result";

    pub const SYSTEM_NAME: &str = "advisor-bridge";
}
