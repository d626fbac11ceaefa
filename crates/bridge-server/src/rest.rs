use crate::error::AppError;
use crate::ndjson::frame_events;
use crate::turn_tracker::{ActiveTurn, TurnTracker};
use crate::types::*;
use axum::{
    Router,
    body::Body,
    extract::{Json, Path, State, rejection::JsonRejection},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use bridge_core::{ActionResultPayload, Error, TurnId, TurnPayload, TurnRequest};
use bridge_runtime::Runtime;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<Runtime>,
    pub turns: Arc<TurnTracker>,
}

/// Build the bridge router with the turn endpoint mounted at `base_path`
pub fn create_router(runtime: Arc<Runtime>, base_path: &str) -> Router {
    let state = AppState {
        runtime,
        turns: Arc::new(TurnTracker::new()),
    };

    Router::new()
        // Health check endpoints
        .route("/health", get(health_check))
        .route("/readiness", get(readiness_check))
        // Bridge endpoints
        .route(base_path, post(run_turn))
        .route(&format!("{}/actions", base_path), post(deliver_action_result))
        .route(&format!("{}/turns/:turn_id/cancel", base_path), post(cancel_turn))
        // Middleware layers (applied in reverse order)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check endpoint - returns OK if the service is running
async fn health_check() -> impl IntoResponse {
    tracing::debug!("Health check requested");
    (StatusCode::OK, "OK")
}

/// Readiness check endpoint - reports registered agents and load
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    tracing::debug!("Readiness check requested");
    Json(ReadinessResponse {
        status: "ready".to_string(),
        agents: state.runtime.registry().names(),
        sessions: state.runtime.sessions().len().await,
        active_turns: state.turns.len(),
    })
}

async fn run_turn(
    State(state): State<AppState>,
    payload: Result<Json<TurnPayload>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(payload) = payload?;
    let request = TurnRequest::from_payload(payload, state.runtime.default_agent())?;

    let token = CancellationToken::new();
    let turn = state.runtime.start_turn(request, token.clone()).await?;

    state
        .turns
        .track(turn.turn_id, turn.conversation_id.clone(), token.clone());
    let active = ActiveTurn::new(state.turns.clone(), turn.turn_id, token);
    let body = Body::from_stream(frame_events(turn.events, active));

    let mut response = Response::new(body);
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(NDJSON_CONTENT_TYPE),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    if let Ok(value) = HeaderValue::from_str(&turn.turn_id.to_string()) {
        headers.insert(TURN_ID_HEADER, value);
    }
    if let Ok(value) = HeaderValue::from_str(turn.conversation_id.as_str()) {
        headers.insert(CONVERSATION_ID_HEADER, value);
    }
    Ok(response)
}

async fn deliver_action_result(
    State(state): State<AppState>,
    payload: Result<Json<ActionResultPayload>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(payload) = payload?;
    let action_call_id = payload.action_call_id.clone();

    match state.runtime.resolve_action(payload).await {
        Ok(()) => Ok((StatusCode::ACCEPTED, Json(ActionAccepted { action_call_id }))),
        Err(Error::SessionError(message)) => Err(AppError::not_found(message)),
        Err(e) => Err(e.into()),
    }
}

async fn cancel_turn(
    State(state): State<AppState>,
    Path(turn_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let turn_id: TurnId = turn_id.parse()?;
    if state.turns.cancel(&turn_id) {
        Ok((StatusCode::ACCEPTED, Json(TurnCancelled { turn_id })))
    } else {
        Err(AppError::not_found(format!("no active turn {}", turn_id)))
    }
}
