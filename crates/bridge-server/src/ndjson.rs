//! Newline-delimited JSON framing of turn events

use crate::turn_tracker::ActiveTurn;
use async_stream::stream;
use axum::body::Bytes;
use bridge_core::{EventStream, StreamEvent};
use futures::stream::{Stream, StreamExt};
use std::convert::Infallible;

/// Encode one event as a single NDJSON line
pub fn encode_frame(event: &StreamEvent) -> Bytes {
    match serde_json::to_vec(event) {
        Ok(mut line) => {
            line.push(b'\n');
            Bytes::from(line)
        }
        Err(e) => {
            tracing::error!(event = event.type_name(), error = %e, "Failed to encode event");
            let fallback = serde_json::json!({
                "type": "error",
                "kind": "internal",
                "message": format!("failed to encode {} event", event.type_name()),
            });
            Bytes::from(format!("{}\n", fallback))
        }
    }
}

/// Frame a turn's events for the response body.
///
/// The body ends right after the terminal event. `active` is held for the
/// lifetime of the body so that dropping the body cancels the turn.
pub fn frame_events(
    mut events: EventStream,
    mut active: ActiveTurn,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send {
    stream! {
        while let Some(event) = events.next().await {
            let terminal = event.is_terminal();
            if terminal {
                active.finish();
            }
            yield Ok::<_, Infallible>(encode_frame(&event));
            if terminal {
                break;
            }
        }
        drop(active);
    }
}
