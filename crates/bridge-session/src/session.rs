//! A single conversation: transcript, shared state and the turn lock

use bridge_core::{
    ActionInvocation, AgentName, ConversationId, Error, Message, Result, SharedState,
    StreamEvent, TurnId,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedMutexGuard, oneshot};

use crate::types::SessionView;

/// Session of one conversation.
///
/// Writes to the transcript and the shared state are only accepted from the
/// turn currently holding the turn lock; every mutating method takes the
/// caller's [`TurnId`] and rejects stale turns.
#[derive(Debug)]
pub struct Session {
    id: ConversationId,
    agent: AgentName,
    created_at: DateTime<Utc>,
    inner: RwLock<SessionInner>,
    turn_lock: Arc<Mutex<()>>,
    pending: DashMap<String, PendingAction>,
}

#[derive(Debug)]
struct SessionInner {
    transcript: Vec<Message>,
    state: SharedState,
    active_turn: Option<TurnId>,
    last_active: Instant,
}

#[derive(Debug)]
struct PendingAction {
    turn_id: TurnId,
    invocation: ActionInvocation,
    reply: oneshot::Sender<Value>,
}

impl Session {
    pub fn new(id: ConversationId, agent: AgentName, initial_state: SharedState) -> Self {
        Self {
            id,
            agent,
            created_at: Utc::now(),
            inner: RwLock::new(SessionInner {
                transcript: Vec::new(),
                state: initial_state,
                active_turn: None,
                last_active: Instant::now(),
            }),
            turn_lock: Arc::new(Mutex::new(())),
            pending: DashMap::new(),
        }
    }

    pub fn id(&self) -> &ConversationId {
        &self.id
    }

    pub fn agent(&self) -> &AgentName {
        &self.agent
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn read(&self) -> RwLockReadGuard<'_, SessionInner> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, SessionInner> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn transcript(&self) -> Vec<Message> {
        self.read().transcript.clone()
    }

    pub fn shared_state(&self) -> SharedState {
        self.read().state.clone()
    }

    pub fn active_turn(&self) -> Option<TurnId> {
        self.read().active_turn
    }

    /// Whether a turn currently holds the turn lock
    pub fn is_busy(&self) -> bool {
        self.turn_lock.try_lock().is_err()
    }

    pub fn idle_for(&self) -> Duration {
        self.read().last_active.elapsed()
    }

    fn touch(&self) {
        self.write().last_active = Instant::now();
    }

    /// Wait for the turn lock. Waiters are served in arrival order.
    pub async fn begin_turn(self: &Arc<Self>, turn_id: TurnId) -> TurnGuard {
        let lock = self.turn_lock.clone().lock_owned().await;
        self.activate(turn_id, lock)
    }

    /// Take the turn lock only if it is free
    pub fn try_begin_turn(self: &Arc<Self>, turn_id: TurnId) -> Option<TurnGuard> {
        let lock = self.turn_lock.clone().try_lock_owned().ok()?;
        Some(self.activate(turn_id, lock))
    }

    fn activate(self: &Arc<Self>, turn_id: TurnId, lock: OwnedMutexGuard<()>) -> TurnGuard {
        {
            let mut inner = self.write();
            inner.active_turn = Some(turn_id);
            inner.last_active = Instant::now();
        }
        tracing::debug!(conversation_id = %self.id, turn_id = %turn_id, "Turn lock acquired");
        TurnGuard {
            session: self.clone(),
            turn_id,
            _lock: lock,
        }
    }

    fn check_active(inner: &SessionInner, turn_id: TurnId) -> Result<()> {
        if inner.active_turn == Some(turn_id) {
            Ok(())
        } else {
            Err(Error::SessionError(format!(
                "turn {} is no longer active",
                turn_id
            )))
        }
    }

    pub fn append_message(&self, turn_id: TurnId, message: Message) -> Result<()> {
        let mut inner = self.write();
        Self::check_active(&inner, turn_id)?;
        inner.transcript.push(message);
        inner.last_active = Instant::now();
        Ok(())
    }

    /// Apply a state-affecting event on behalf of the active turn.
    ///
    /// Returns `Ok(true)` if the shared state changed.
    pub fn apply_state_event(&self, turn_id: TurnId, event: &StreamEvent) -> Result<bool> {
        let mut inner = self.write();
        Self::check_active(&inner, turn_id)?;
        let changed = inner.state.apply_event(event)?;
        inner.last_active = Instant::now();
        Ok(changed)
    }

    /// Record a UI action call and get the receiver its result will arrive on
    pub fn register_pending_action(
        &self,
        turn_id: TurnId,
        invocation: ActionInvocation,
    ) -> Result<oneshot::Receiver<Value>> {
        Self::check_active(&self.read(), turn_id)?;
        let (reply, rx) = oneshot::channel();
        self.pending.insert(
            invocation.action_call_id.clone(),
            PendingAction {
                turn_id,
                invocation,
                reply,
            },
        );
        Ok(rx)
    }

    /// Deliver the result of a pending action call
    pub fn resolve_action(&self, action_call_id: &str, result: Value) -> Result<()> {
        let (_, pending) = self.pending.remove(action_call_id).ok_or_else(|| {
            Error::SessionError(format!(
                "no pending action call '{}' in conversation {}",
                action_call_id, self.id
            ))
        })?;
        self.touch();
        pending.reply.send(result).map_err(|_| {
            Error::SessionError(format!(
                "turn waiting for action call '{}' has ended",
                action_call_id
            ))
        })
    }

    /// Drop a pending action call without a result
    pub fn discard_pending_action(&self, action_call_id: &str) {
        self.pending.remove(action_call_id);
    }

    pub fn pending_actions(&self) -> Vec<ActionInvocation> {
        self.pending
            .iter()
            .map(|entry| entry.value().invocation.clone())
            .collect()
    }

    pub fn view(&self) -> SessionView {
        let inner = self.read();
        SessionView {
            conversation_id: self.id.clone(),
            agent_name: self.agent.clone(),
            transcript: inner.transcript.clone(),
            shared_state: inner.state.clone(),
            pending_actions: self.pending_actions(),
            busy: self.is_busy(),
        }
    }
}

/// Holds a session's turn lock for one turn.
///
/// Dropping the guard ends the turn: the session stops accepting writes from
/// this turn, its pending action calls are discarded and the lock is released
/// to the next queued turn.
pub struct TurnGuard {
    session: Arc<Session>,
    turn_id: TurnId,
    _lock: OwnedMutexGuard<()>,
}

impl TurnGuard {
    pub fn turn_id(&self) -> TurnId {
        self.turn_id
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// End the turn now
    pub fn release(self) {}
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        {
            let mut inner = self.session.write();
            if inner.active_turn == Some(self.turn_id) {
                inner.active_turn = None;
            }
            inner.last_active = Instant::now();
        }
        let turn_id = self.turn_id;
        self.session.pending.retain(|_, p| p.turn_id != turn_id);
        tracing::debug!(
            conversation_id = %self.session.id,
            turn_id = %turn_id,
            "Turn lock released"
        );
    }
}
