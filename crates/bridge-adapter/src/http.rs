//! AG-UI over HTTP: one POST per run, events streamed back as SSE

use crate::agui::{EventMapper, RunAgentInput, Step, decode_event};
use crate::error::AdapterError;
use async_stream::stream;
use async_trait::async_trait;
use bridge_core::{
    ActionDeclaration, AdapterInput, AdapterRequest, AdapterSession, AgentAdapter, Error, Result,
    SharedState, StreamEvent,
};
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use reqwest::Client;
use reqwest::header::ACCEPT;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

const INPUT_CAPACITY: usize = 16;

enum Incoming<F> {
    Frame(Option<F>),
    Input(Option<AdapterInput>),
}

/// Adapter for agents speaking the AG-UI protocol over HTTP.
///
/// Each turn is sent as a `RunAgentInput` POST. When the run finishes after
/// calling UI-declared actions, the adapter waits for their results on the
/// session input and starts a follow-up run that carries them back.
pub struct AgUiAdapter {
    endpoint: Url,
    client: Client,
}

impl AgUiAdapter {
    pub fn new(endpoint: Url, connect_timeout: Duration) -> Result<Self> {
        // No overall timeout: runs stream for as long as the agent talks
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| Error::config_error(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { endpoint, client })
    }
}

async fn post_run(
    client: &Client,
    endpoint: &Url,
    input: &RunAgentInput,
) -> std::result::Result<reqwest::Response, AdapterError> {
    let response = client
        .post(endpoint.clone())
        .header(ACCEPT, "text/event-stream")
        .json(input)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(AdapterError::Status { status, body });
    }
    Ok(response)
}

#[async_trait]
impl AgentAdapter for AgUiAdapter {
    fn protocol(&self) -> &str {
        "ag-ui"
    }

    fn endpoint(&self) -> Option<&str> {
        Some(self.endpoint.as_str())
    }

    async fn open(&self, request: AdapterRequest) -> Result<AdapterSession> {
        let input = RunAgentInput::from_request(&request);
        tracing::debug!(
            endpoint = %self.endpoint,
            thread_id = %input.thread_id,
            run_id = %input.run_id,
            messages = input.messages.len(),
            tools = input.tools.len(),
            "Opening AG-UI run"
        );

        let response = post_run(&self.client, &self.endpoint, &input)
            .await
            .map_err(|e| {
                tracing::warn!(endpoint = %self.endpoint, error = %e, "AG-UI run request failed");
                Error::from(e)
            })?;

        let (tx, rx) = mpsc::channel(INPUT_CAPACITY);
        let events = relay_runs(
            self.client.clone(),
            self.endpoint.clone(),
            input,
            response,
            rx,
            request.declared_actions,
            request.state,
            request.cancel,
        );
        Ok(AdapterSession::new(Box::new(Box::pin(events)), tx))
    }
}

#[allow(clippy::too_many_arguments)]
fn relay_runs(
    client: Client,
    endpoint: Url,
    mut input: RunAgentInput,
    first: reqwest::Response,
    mut rx: mpsc::Receiver<AdapterInput>,
    declared: Vec<ActionDeclaration>,
    mut state: SharedState,
    cancel: CancellationToken,
) -> impl Stream<Item = StreamEvent> + Send {
    stream! {
        let mut mapper = EventMapper::new(&declared);
        let mut response = first;

        let mut inputs_open = true;

        loop {
            let mut frames = Box::pin(response.bytes_stream().eventsource());
            let mut finished = false;
            // Results can arrive while the run is still streaming
            let mut early = HashMap::new();

            loop {
                let incoming = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    received = rx.recv(), if inputs_open => Incoming::Input(received),
                    frame = frames.next() => Incoming::Frame(frame),
                };
                let frame = match incoming {
                    Incoming::Input(Some(AdapterInput::ActionResult { action_call_id, result })) => {
                        early.insert(action_call_id, result);
                        continue;
                    }
                    Incoming::Input(None) => {
                        inputs_open = false;
                        continue;
                    }
                    Incoming::Frame(Some(Ok(frame))) => frame,
                    Incoming::Frame(Some(Err(e))) => {
                        yield StreamEvent::stream_error(format!("agent stream failed: {}", e));
                        return;
                    }
                    Incoming::Frame(None) => break,
                };
                if frame.data.is_empty() {
                    continue;
                }
                let event = match decode_event(&frame.data) {
                    Ok(event) => event,
                    Err(e) => {
                        yield StreamEvent::stream_error(format!("undecodable agent event: {}", e));
                        return;
                    }
                };
                match mapper.on_event(event) {
                    Step::Emit(event) => {
                        if let Err(e) = state.apply_event(&event) {
                            tracing::debug!(error = %e, "Agent state event did not apply locally");
                        }
                        yield event;
                    }
                    Step::Skip => {}
                    Step::RunFinished => {
                        finished = true;
                        break;
                    }
                    Step::Failed(message) => {
                        yield StreamEvent::stream_error(message);
                        return;
                    }
                }
            }

            if !finished {
                yield StreamEvent::stream_error("agent stream ended before RUN_FINISHED");
                return;
            }

            let run = mapper.finish_run();
            if run.calls.is_empty() {
                yield StreamEvent::SessionEnd;
                return;
            }

            let mut results: HashMap<String, serde_json::Value> = early
                .into_iter()
                .filter(|(id, _)| run.calls.iter().any(|call| &call.id == id))
                .collect();
            while results.len() < run.calls.len() {
                if !inputs_open {
                    // The turn was abandoned
                    return;
                }
                let received = tokio::select! {
                    _ = cancel.cancelled() => return,
                    received = rx.recv() => received,
                };
                match received {
                    Some(AdapterInput::ActionResult { action_call_id, result }) => {
                        if run.calls.iter().any(|call| call.id == action_call_id) {
                            results.insert(action_call_id, result);
                        }
                    }
                    None => inputs_open = false,
                }
            }

            input.state = state.value.clone();
            input.continue_with(run, &results);
            tracing::debug!(run_id = %input.run_id, results = results.len(), "Starting follow-up AG-UI run");

            response = match post_run(&client, &endpoint, &input).await {
                Ok(response) => response,
                Err(e) => {
                    yield StreamEvent::stream_error(format!("follow-up run failed: {}", e));
                    return;
                }
            };
        }
    }
}
