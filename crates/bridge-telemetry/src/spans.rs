//! Span helpers for agent stream opens and UI action round trips

use crate::attributes::*;

/// Attributes for tracing one attempt to open an agent stream
#[derive(Debug, Clone)]
pub struct AdapterSpanAttributes {
    pub protocol: String,
    pub agent: String,
    pub turn_id: String,
    pub conversation_id: String,
    pub attempt: u32,
    /// `opened`, `timeout` or the error kind of the failed attempt
    pub outcome: String,
}

/// Attributes for tracing a UI action from call to result
#[derive(Debug, Clone)]
pub struct ActionSpanAttributes {
    pub action_name: String,
    pub action_call_id: String,
    pub turn_id: String,
    pub conversation_id: String,
    pub required: bool,
    pub args_json: String,
    pub result_json: String,
}

/// Record a span for one attempt at opening an agent stream.
pub fn trace_adapter_open(attrs: AdapterSpanAttributes) {
    let span = tracing::info_span!(
        "open_agent_stream",
        { BRIDGE_SYSTEM } = SYSTEM_NAME,
        { BRIDGE_OPERATION_NAME } = "open_agent_stream",
        { BRIDGE_ADAPTER_PROTOCOL } = %attrs.protocol,
        { BRIDGE_AGENT_NAME } = %attrs.agent,
        { BRIDGE_TURN_ID } = %attrs.turn_id,
        { BRIDGE_CONVERSATION_ID } = %attrs.conversation_id,
        { BRIDGE_ADAPTER_ATTEMPT } = attrs.attempt,
        { BRIDGE_ADAPTER_OUTCOME } = %attrs.outcome,
    );

    // Entered and closed right away; the span only carries the record
    let _guard = span.enter();
}

/// Record a span for a UI action once its result is known.
///
/// The result is whatever was fed back to the agent, including the
/// `skipped` result of optional actions nobody answered.
pub fn trace_action_call(attrs: ActionSpanAttributes) {
    let span = tracing::info_span!(
        "execute_action",
        { BRIDGE_SYSTEM } = SYSTEM_NAME,
        { BRIDGE_OPERATION_NAME } = "execute_action",
        { BRIDGE_ACTION_NAME } = %attrs.action_name,
        { BRIDGE_ACTION_CALL_ID } = %attrs.action_call_id,
        { BRIDGE_ACTION_REQUIRED } = attrs.required,
        { BRIDGE_TURN_ID } = %attrs.turn_id,
        { BRIDGE_CONVERSATION_ID } = %attrs.conversation_id,
        { BRIDGE_ACTION_ARGS } = %attrs.args_json,
        { BRIDGE_ACTION_RESULT } = %attrs.result_json,
    );

    let _guard = span.enter();
}

/// Serialize for a span attribute, never failing
pub fn safe_serialize<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "<not serializable>".to_string())
}
