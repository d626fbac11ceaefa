use bridge_core::{Message, Result, StreamEvent};
use bridge_session::{Session, TurnGuard};
use serde_json::Value;
use std::sync::Arc;

struct Draft {
    message_id: String,
    text: String,
}

/// Writes one turn's output into its session while holding the turn lock.
///
/// Message fragments are buffered per message id in order of first appearance
/// and committed as agent messages before any tool message and when the turn
/// ends. Dropping the recorder commits what was buffered and releases the lock,
/// so a turn abandoned mid-stream still leaves the text the client saw.
pub(crate) struct TurnRecorder {
    guard: Option<TurnGuard>,
    drafts: Vec<Draft>,
}

impl TurnRecorder {
    pub(crate) fn new(guard: TurnGuard) -> Self {
        Self {
            guard: Some(guard),
            drafts: Vec::new(),
        }
    }

    pub(crate) fn session(&self) -> Option<&Arc<Session>> {
        self.guard.as_ref().map(TurnGuard::session)
    }

    pub(crate) fn push_delta(&mut self, message_id: &str, delta: &str) {
        match self.drafts.iter_mut().find(|d| d.message_id == message_id) {
            Some(draft) => draft.text.push_str(delta),
            None => self.drafts.push(Draft {
                message_id: message_id.to_string(),
                text: delta.to_string(),
            }),
        }
    }

    pub(crate) fn apply_state(&self, event: &StreamEvent) -> Result<bool> {
        match &self.guard {
            Some(guard) => guard.session().apply_state_event(guard.turn_id(), event),
            None => Ok(false),
        }
    }

    pub(crate) fn record_tool_result(&mut self, action_call_id: &str, result: &Value) {
        self.flush();
        self.append(Message::new_tool_result(action_call_id, result.to_string()));
    }

    /// Commit buffered agent messages
    pub(crate) fn flush(&mut self) {
        for draft in std::mem::take(&mut self.drafts) {
            self.append(Message::new_agent_text(draft.message_id, draft.text));
        }
    }

    /// Commit everything and release the turn lock
    pub(crate) fn finish(mut self) {
        self.flush();
        self.guard.take();
    }

    fn append(&self, message: Message) {
        if let Some(guard) = &self.guard
            && let Err(e) = guard.session().append_message(guard.turn_id(), message)
        {
            tracing::warn!(turn_id = %guard.turn_id(), error = %e, "Dropped transcript entry");
        }
    }
}

impl Drop for TurnRecorder {
    fn drop(&mut self) {
        if self.guard.is_some() {
            self.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_core::{AgentName, ConversationId, Role, SharedState, TurnId};
    use serde_json::json;

    fn session() -> Arc<Session> {
        Arc::new(Session::new(
            ConversationId::parse("c1").unwrap(),
            AgentName::parse("advisor").unwrap(),
            SharedState::default(),
        ))
    }

    #[tokio::test]
    async fn test_deltas_grouped_by_first_appearance() {
        let session = session();
        let mut recorder = TurnRecorder::new(session.begin_turn(TurnId::new()).await);

        recorder.push_delta("m1", "Tesla ");
        recorder.push_delta("m2", "Chart ready.");
        recorder.push_delta("m1", "is up.");
        recorder.finish();

        let transcript = session.transcript();
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript[0].content, "Tesla is up.");
        assert_eq!(transcript[1].content, "Chart ready.");
        assert!(!session.is_busy());
    }

    #[tokio::test]
    async fn test_tool_result_commits_text_first() {
        let session = session();
        let mut recorder = TurnRecorder::new(session.begin_turn(TurnId::new()).await);

        recorder.push_delta("m1", "Showing chart");
        recorder.record_tool_result("a1", &json!({"shown": true}));
        recorder.finish();

        let transcript = session.transcript();
        assert_eq!(transcript[0].role, Role::Agent);
        assert_eq!(transcript[1].role, Role::Tool);
        assert_eq!(transcript[1].action_call_id.as_deref(), Some("a1"));
    }

    #[tokio::test]
    async fn test_drop_commits_and_releases() {
        let session = session();
        let mut recorder = TurnRecorder::new(session.begin_turn(TurnId::new()).await);
        recorder.push_delta("m1", "partial");
        drop(recorder);

        assert_eq!(session.transcript()[0].content, "partial");
        assert!(session.try_begin_turn(TurnId::new()).is_some());
    }
}
