//! Turn tracking for cancellation support

use bridge_core::{ConversationId, TurnId};
use dashmap::DashMap;
use std::sync::Arc;
use tokio_util::sync::{CancellationToken, DropGuard};

/// Tracks turns whose response is still streaming
#[derive(Default)]
pub struct TurnTracker {
    active: DashMap<TurnId, TurnEntry>,
}

struct TurnEntry {
    conversation_id: ConversationId,
    token: CancellationToken,
}

impl TurnTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&self, turn_id: TurnId, conversation_id: ConversationId, token: CancellationToken) {
        self.active.insert(
            turn_id,
            TurnEntry {
                conversation_id,
                token,
            },
        );
    }

    /// Cancel a turn by its ID
    ///
    /// Returns true if the turn was found and cancelled, false otherwise
    pub fn cancel(&self, turn_id: &TurnId) -> bool {
        match self.active.get(turn_id) {
            Some(entry) => {
                entry.token.cancel();
                tracing::info!(
                    turn_id = %turn_id,
                    conversation_id = %entry.conversation_id,
                    "Turn cancelled on request"
                );
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, turn_id: &TurnId) -> bool {
        self.active.contains_key(turn_id)
    }

    pub fn complete(&self, turn_id: &TurnId) {
        self.active.remove(turn_id);
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

/// Lives inside a streaming response body.
///
/// Dropping it before [`ActiveTurn::finish`] means the client went away: the
/// turn's token is cancelled through the drop guard.
pub struct ActiveTurn {
    tracker: Arc<TurnTracker>,
    turn_id: TurnId,
    cancel_on_drop: Option<DropGuard>,
}

impl ActiveTurn {
    pub fn new(tracker: Arc<TurnTracker>, turn_id: TurnId, token: CancellationToken) -> Self {
        Self {
            tracker,
            turn_id,
            cancel_on_drop: Some(token.drop_guard()),
        }
    }

    /// The terminal event went out
    pub fn finish(&mut self) {
        if let Some(guard) = self.cancel_on_drop.take() {
            guard.disarm();
        }
    }
}

impl Drop for ActiveTurn {
    fn drop(&mut self) {
        self.tracker.complete(&self.turn_id);
        if self.cancel_on_drop.is_some() {
            tracing::info!(turn_id = %self.turn_id, "Client disconnected before the turn ended");
        }
    }
}
