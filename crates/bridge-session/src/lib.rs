//! Session management for the bridge

use async_trait::async_trait;
use bridge_core::{ConversationId, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub mod inmemory;
pub mod session;
pub mod types;

pub use inmemory::InMemorySessionService;
pub use session::{Session, TurnGuard};
pub use types::{CreateRequest, SessionView};

/// Session service trait
#[async_trait]
pub trait SessionService: Send + Sync {
    async fn get(&self, conversation_id: &ConversationId) -> Result<Arc<Session>>;

    /// Load the session of a conversation, creating it on first use.
    ///
    /// The flag is `true` when the session was created by this call.
    async fn get_or_create(&self, req: &CreateRequest) -> Result<(Arc<Session>, bool)>;

    async fn remove(&self, conversation_id: &ConversationId) -> bool;

    /// Drop sessions idle for at least `idle_timeout`. Sessions with a turn
    /// in flight are never evicted.
    async fn evict_idle(&self, idle_timeout: Duration) -> Vec<ConversationId>;

    async fn len(&self) -> usize;
}

/// Periodically evict idle sessions until `shutdown` is cancelled
pub fn spawn_idle_sweeper(
    service: Arc<dyn SessionService>,
    idle_timeout: Duration,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let evicted = service.evict_idle(idle_timeout).await;
                    if !evicted.is_empty() {
                        tracing::info!(count = evicted.len(), "Evicted idle sessions");
                    }
                }
            }
        }
        tracing::debug!("Session sweeper stopped");
    })
}
