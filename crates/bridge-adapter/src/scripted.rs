//! Scripted agent adapter
//!
//! Plays back a fixed list of steps for every turn. Used to exercise the
//! runtime and the server without a live agent, including agents that are
//! slow, hang, or keep producing after the turn was abandoned.

use async_stream::stream;
use async_trait::async_trait;
use bridge_core::{
    AdapterInput, AdapterRequest, AdapterSession, AgentAdapter, Error, Result, StreamEvent,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub enum ScriptStep {
    Emit(StreamEvent),
    Delay(Duration),
    /// Wait for one input (an action result) from the runtime
    AwaitInput,
    /// Never produce anything again
    Hang,
}

/// Counters shared between a [`ScriptedAdapter`] and its running scripts
#[derive(Debug, Default)]
pub struct ScriptStats {
    opens: AtomicUsize,
    cancelled: AtomicUsize,
    late_events_dropped: AtomicUsize,
    inputs: Mutex<Vec<AdapterInput>>,
    requests: Mutex<Vec<AdapterRequest>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ScriptStats {
    /// Number of `open` calls, including failed ones
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Number of scripts that stopped because their turn was cancelled
    pub fn cancelled(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Events produced after the runtime stopped listening
    pub fn late_events_dropped(&self) -> usize {
        self.late_events_dropped.load(Ordering::SeqCst)
    }

    pub fn inputs(&self) -> Vec<AdapterInput> {
        lock(&self.inputs).clone()
    }

    pub fn requests(&self) -> Vec<AdapterRequest> {
        lock(&self.requests).clone()
    }
}

pub struct ScriptedAdapter {
    script: Vec<ScriptStep>,
    failing_opens: AtomicUsize,
    ignore_cancellation: bool,
    stats: Arc<ScriptStats>,
}

impl ScriptedAdapter {
    pub fn new(script: Vec<ScriptStep>) -> Self {
        Self {
            script,
            failing_opens: AtomicUsize::new(0),
            ignore_cancellation: false,
            stats: Arc::new(ScriptStats::default()),
        }
    }

    /// Script that emits `events` in order
    pub fn emitting(events: impl IntoIterator<Item = StreamEvent>) -> Self {
        Self::new(events.into_iter().map(ScriptStep::Emit).collect())
    }

    /// Fail the first `count` opens as unavailable
    pub fn failing_first(self, count: usize) -> Self {
        self.failing_opens.store(count, Ordering::SeqCst);
        self
    }

    /// Keep running after the turn's cancellation token fires
    pub fn ignoring_cancellation(mut self) -> Self {
        self.ignore_cancellation = true;
        self
    }

    pub fn stats(&self) -> Arc<ScriptStats> {
        self.stats.clone()
    }
}

#[async_trait]
impl AgentAdapter for ScriptedAdapter {
    fn protocol(&self) -> &str {
        "scripted"
    }

    async fn open(&self, request: AdapterRequest) -> Result<AdapterSession> {
        self.stats.opens.fetch_add(1, Ordering::SeqCst);
        let cancel = request.cancel.clone();
        lock(&self.stats.requests).push(request);

        let failing = self
            .failing_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::AdapterUnavailable(
                "scripted agent is unavailable".to_string(),
            ));
        }

        let (event_tx, mut event_rx) = mpsc::channel(1);
        let (input_tx, input_rx) = mpsc::channel(16);
        tokio::spawn(play(
            self.script.clone(),
            event_tx,
            input_rx,
            cancel,
            self.ignore_cancellation,
            self.stats.clone(),
        ));

        let events = stream! {
            while let Some(event) = event_rx.recv().await {
                yield event;
            }
        };
        Ok(AdapterSession::new(Box::new(Box::pin(events)), input_tx))
    }
}

async fn play(
    script: Vec<ScriptStep>,
    events: mpsc::Sender<StreamEvent>,
    mut inputs: mpsc::Receiver<AdapterInput>,
    cancel: CancellationToken,
    ignore_cancellation: bool,
    stats: Arc<ScriptStats>,
) {
    let stop = || {
        stats.cancelled.fetch_add(1, Ordering::SeqCst);
        tracing::debug!("Scripted agent stopped on cancellation");
    };

    for step in script {
        match step {
            ScriptStep::Emit(event) => {
                if !ignore_cancellation && cancel.is_cancelled() {
                    stop();
                    return;
                }
                if events.send(event).await.is_err() {
                    stats.late_events_dropped.fetch_add(1, Ordering::SeqCst);
                    if !ignore_cancellation {
                        return;
                    }
                }
            }
            ScriptStep::Delay(duration) => {
                if ignore_cancellation {
                    tokio::time::sleep(duration).await;
                } else {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            stop();
                            return;
                        }
                        _ = tokio::time::sleep(duration) => {}
                    }
                }
            }
            ScriptStep::AwaitInput => {
                let received = if ignore_cancellation {
                    inputs.recv().await
                } else {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            stop();
                            return;
                        }
                        received = inputs.recv() => received,
                    }
                };
                match received {
                    Some(input) => lock(&stats.inputs).push(input),
                    None => return,
                }
            }
            ScriptStep::Hang => {
                if ignore_cancellation {
                    std::future::pending::<()>().await;
                } else {
                    cancel.cancelled().await;
                    stop();
                }
                return;
            }
        }
    }
}
