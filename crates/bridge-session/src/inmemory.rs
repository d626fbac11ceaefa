use super::*;
use bridge_core::{Error, SharedState};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::time::Duration;

pub struct InMemorySessionService {
    sessions: DashMap<ConversationId, Arc<Session>>,
}

impl InMemorySessionService {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }
}

impl Default for InMemorySessionService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionService for InMemorySessionService {
    async fn get(&self, conversation_id: &ConversationId) -> Result<Arc<Session>> {
        self.sessions
            .get(conversation_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                Error::SessionError(format!("Session {} not found", conversation_id))
            })
    }

    async fn get_or_create(&self, req: &CreateRequest) -> Result<(Arc<Session>, bool)> {
        match self.sessions.entry(req.conversation_id.clone()) {
            Entry::Occupied(entry) => {
                let session = entry.get().clone();
                if session.agent() != &req.agent {
                    return Err(Error::bad_request(format!(
                        "conversation {} belongs to agent '{}', not '{}'",
                        req.conversation_id,
                        session.agent(),
                        req.agent
                    )));
                }
                Ok((session, false))
            }
            Entry::Vacant(entry) => {
                let state = req
                    .initial_state
                    .clone()
                    .map(SharedState::new)
                    .unwrap_or_default();
                let session = Arc::new(Session::new(
                    req.conversation_id.clone(),
                    req.agent.clone(),
                    state,
                ));
                entry.insert(session.clone());
                tracing::info!(
                    conversation_id = %req.conversation_id,
                    agent = %req.agent,
                    "Session created"
                );
                Ok((session, true))
            }
        }
    }

    async fn remove(&self, conversation_id: &ConversationId) -> bool {
        self.sessions.remove(conversation_id).is_some()
    }

    async fn evict_idle(&self, idle_timeout: Duration) -> Vec<ConversationId> {
        let mut evicted = Vec::new();
        self.sessions.retain(|id, session| {
            let expired = !session.is_busy() && session.idle_for() >= idle_timeout;
            if expired {
                evicted.push(id.clone());
            }
            !expired
        });
        evicted
    }

    async fn len(&self) -> usize {
        self.sessions.len()
    }
}
