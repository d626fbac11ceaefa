use crate::{Error, ErrorKind, Role, StatePatch};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// StreamEvent is one unit of an agent turn as relayed to the client.
///
/// Events are JSON-serializable with a `type` discriminator so that the
/// bridge can frame them one per line. Every turn ends with exactly one
/// terminal event: [`StreamEvent::SessionEnd`] or [`StreamEvent::Error`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A fragment of an agent message
    MessageDelta {
        #[serde(rename = "messageId")]
        message_id: String,
        #[serde(default)]
        role: Role,
        delta: String,
    },
    /// Full replacement of the shared state
    StateSnapshot { snapshot: Value },
    /// Incremental update of the shared state
    StateDelta { delta: StatePatch },
    /// The agent invokes an action
    ActionCall {
        #[serde(rename = "actionCallId")]
        action_call_id: String,
        name: String,
        #[serde(default)]
        arguments: Value,
    },
    /// Result of an action, fed back into the turn
    ActionResult {
        #[serde(rename = "actionCallId")]
        action_call_id: String,
        result: Value,
    },
    /// The turn completed
    SessionEnd,
    /// The turn failed; events relayed before it remain valid
    Error { kind: ErrorKind, message: String },
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::SessionEnd | StreamEvent::Error { .. })
    }

    pub fn is_state_update(&self) -> bool {
        matches!(
            self,
            StreamEvent::StateSnapshot { .. } | StreamEvent::StateDelta { .. }
        )
    }

    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        StreamEvent::Error {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::error(ErrorKind::Timeout, message)
    }

    pub fn stream_error(message: impl Into<String>) -> Self {
        Self::error(ErrorKind::StreamError, message)
    }

    /// Short label used in log fields
    pub fn type_name(&self) -> &'static str {
        match self {
            StreamEvent::MessageDelta { .. } => "message_delta",
            StreamEvent::StateSnapshot { .. } => "state_snapshot",
            StreamEvent::StateDelta { .. } => "state_delta",
            StreamEvent::ActionCall { .. } => "action_call",
            StreamEvent::ActionResult { .. } => "action_result",
            StreamEvent::SessionEnd => "session_end",
            StreamEvent::Error { .. } => "error",
        }
    }
}

impl From<&Error> for StreamEvent {
    fn from(err: &Error) -> Self {
        StreamEvent::error(err.kind(), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_frame_shapes() {
        let delta = StreamEvent::MessageDelta {
            message_id: "m1".into(),
            role: Role::Agent,
            delta: "Tesla is".into(),
        };
        assert_eq!(
            serde_json::to_value(&delta).unwrap(),
            json!({"type": "message_delta", "messageId": "m1", "role": "agent", "delta": "Tesla is"})
        );

        assert_eq!(
            serde_json::to_value(StreamEvent::SessionEnd).unwrap(),
            json!({"type": "session_end"})
        );

        let err = StreamEvent::timeout("no events within 30s");
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            json!({"type": "error", "kind": "timeout", "message": "no events within 30s"})
        );
    }

    #[test]
    fn test_parse_state_delta_frame() {
        let event: StreamEvent = serde_json::from_str(
            r#"{"type":"state_delta","delta":{"latest_stock_price":255}}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            StreamEvent::StateDelta {
                delta: StatePatch::Merge(json!({"latest_stock_price": 255}))
            }
        );
        assert!(event.is_state_update());
        assert!(!event.is_terminal());
    }

    #[test]
    fn test_terminal_events() {
        assert!(StreamEvent::SessionEnd.is_terminal());
        assert!(StreamEvent::stream_error("reset").is_terminal());
        assert!(
            !StreamEvent::ActionResult {
                action_call_id: "c1".into(),
                result: json!({})
            }
            .is_terminal()
        );
    }

    #[test]
    fn test_from_error() {
        let event = StreamEvent::from(&Error::Timeout("adapter".into()));
        match event {
            StreamEvent::Error { kind, message } => {
                assert_eq!(kind, ErrorKind::Timeout);
                assert!(message.contains("adapter"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
