// End-to-end tests against a fake AG-UI agent
// A local axum app speaks AG-UI over SSE; the bridge relays it to a state binder.

use axum::Router;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use bridge_adapter::AgUiAdapter;
use bridge_client::{StateBinder, TurnOutcome};
use bridge_core::config::{RetryConfig, TimeoutConfig};
use bridge_core::{ActionDeclaration, AgentAdapter, AgentRegistration, ErrorKind, Role};
use bridge_runtime::{Runtime, RuntimeRegistry};
use bridge_server::create_router;
use bridge_session::InMemorySessionService;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const BASE: &str = "/api/copilotkit";
const ADVISOR: &str = "investment_advisor_team";

fn sse(events: &[Value]) -> Response {
    let body: String = events
        .iter()
        .map(|e| format!("data: {}\n\n", e))
        .collect();
    ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
}

async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Start the fake agent and a bridge in front of it; returns the turn endpoint
async fn bridge_to(agent: Router) -> String {
    let agent_url = serve(agent).await;
    let registration = AgentRegistration {
        name: bridge_core::AgentName::parse(ADVISOR).unwrap(),
        endpoint: format!("{}/agui", agent_url).parse().unwrap(),
    };
    let registry = RuntimeRegistry::from_registrations(&[registration], |registration| {
        let adapter: Arc<dyn AgentAdapter> = Arc::new(AgUiAdapter::new(
            registration.endpoint.clone(),
            Duration::from_millis(500),
        )?);
        Ok(adapter)
    })
    .unwrap();

    let runtime = Runtime::builder()
        .registry(registry)
        .session_service(Arc::new(InMemorySessionService::new()))
        .timeouts(TimeoutConfig {
            adapter_ms: 2_000,
            action_ms: 2_000,
            connect_ms: 500,
        })
        .retry(RetryConfig {
            max_attempts: 2,
            initial_backoff_ms: 10,
        })
        .build()
        .unwrap();

    let bridge_url = serve(create_router(Arc::new(runtime), BASE)).await;
    format!("{}{}", bridge_url, BASE)
}

/// Fake advisor team: researches the stock, asks the UI for a chart, then
/// reports the price move once the chart result comes back.
fn advisor_agent(requests: Arc<Mutex<Vec<Value>>>) -> Router {
    Router::new().route(
        "/agui",
        post(move |axum::Json(body): axum::Json<Value>| {
            let requests = requests.clone();
            async move {
                requests.lock().unwrap().push(body.clone());
                let messages = body["messages"].as_array().cloned().unwrap_or_default();
                match messages.last() {
                    Some(last) if last["role"] == "tool" => sse(&[
                        json!({"type": "RUN_STARTED", "threadId": body["threadId"], "runId": "r2"}),
                        json!({"type": "STATE_DELTA", "delta": [
                            {"op": "replace", "path": "/latest_stock_price", "value": 255}
                        ]}),
                        json!({"type": "TEXT_MESSAGE_CHUNK", "messageId": "m2", "delta": "TSLA moved to 255."}),
                        json!({"type": "RUN_FINISHED", "threadId": body["threadId"], "runId": "r2"}),
                    ]),
                    _ => sse(&[
                        json!({"type": "RUN_STARTED", "threadId": body["threadId"], "runId": "r1"}),
                        json!({"type": "STATE_SNAPSHOT", "snapshot": {"latest_stock_price": 250, "ticker": "TSLA"}}),
                        json!({"type": "TEXT_MESSAGE_START", "messageId": "m1", "role": "assistant"}),
                        json!({"type": "TEXT_MESSAGE_CONTENT", "messageId": "m1", "delta": "Tesla trades "}),
                        json!({"type": "TEXT_MESSAGE_CONTENT", "messageId": "m1", "delta": "at 250."}),
                        json!({"type": "TEXT_MESSAGE_END", "messageId": "m1"}),
                        json!({"type": "TOOL_CALL_START", "toolCallId": "t1", "toolCallName": "render_chart"}),
                        json!({"type": "TOOL_CALL_ARGS", "toolCallId": "t1", "delta": "{\"ticker\":"}),
                        json!({"type": "TOOL_CALL_ARGS", "toolCallId": "t1", "delta": "\"TSLA\"}"}),
                        json!({"type": "TOOL_CALL_END", "toolCallId": "t1"}),
                        json!({"type": "RUN_FINISHED", "threadId": body["threadId"], "runId": "r1"}),
                    ]),
                }
            }
        }),
    )
}

#[tokio::test]
async fn test_price_move_reaches_the_ui() {
    let requests = Arc::new(Mutex::new(Vec::new()));
    let endpoint = bridge_to(advisor_agent(requests.clone())).await;

    let binder = StateBinder::subscribe(&endpoint, ADVISOR, json!({"latest_stock_price": 0})).unwrap();
    let mut updates = binder.watch();
    binder
        .register_action(
            ActionDeclaration::new("render_chart").required(true),
            |args: Value| async move { Ok(json!({"shown": args["ticker"]})) },
        )
        .unwrap();

    let outcome = binder.send_message("Research Tesla").await.unwrap();
    assert_eq!(outcome, TurnOutcome::Completed);

    assert_eq!(binder.live_state().get("latest_stock_price"), Some(&json!(255)));
    assert_eq!(
        updates.borrow_and_update().get("ticker"),
        Some(&json!("TSLA"))
    );

    let transcript = binder.transcript();
    let contents: Vec<(Role, &str)> = transcript
        .iter()
        .map(|m| (m.role, m.content.as_str()))
        .collect();
    assert_eq!(contents[0], (Role::User, "Research Tesla"));
    assert_eq!(contents[1], (Role::Agent, "Tesla trades at 250."));
    assert_eq!(contents[2].0, Role::Tool);
    assert_eq!(contents[3], (Role::Agent, "TSLA moved to 255."));

    // Two runs: the second one carries the UI's chart result
    let requests = requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0]["tools"][0]["name"], "render_chart");
    assert_eq!(requests[0]["state"]["latest_stock_price"], 0);
    assert_eq!(requests[0]["threadId"], requests[1]["threadId"]);
    assert_eq!(requests[1]["state"]["latest_stock_price"], 250);

    let follow_up = requests[1]["messages"].as_array().unwrap();
    let tool = follow_up.last().unwrap();
    assert_eq!(tool["toolCallId"], "t1");
    let result: Value = serde_json::from_str(tool["content"].as_str().unwrap()).unwrap();
    assert_eq!(result, json!({"shown": "TSLA"}));
}

#[tokio::test]
async fn test_run_with_many_chart_calls_completes() {
    let agent = Router::new().route(
        "/agui",
        post(|axum::Json(body): axum::Json<Value>| async move {
            let messages = body["messages"].as_array().cloned().unwrap_or_default();
            let answered = messages.iter().filter(|m| m["role"] == "tool").count();
            if answered > 0 {
                return sse(&[
                    json!({"type": "TEXT_MESSAGE_CHUNK", "messageId": "m2", "delta": format!("{} charts", answered)}),
                    json!({"type": "RUN_FINISHED"}),
                ]);
            }
            let mut events = vec![json!({"type": "RUN_STARTED"})];
            for i in 0..24 {
                let id = format!("c{}", i);
                events.push(json!({"type": "TOOL_CALL_START", "toolCallId": id, "toolCallName": "render_chart"}));
                events.push(json!({"type": "TOOL_CALL_ARGS", "toolCallId": id, "delta": format!("{{\"n\":{}}}", i)}));
                events.push(json!({"type": "TOOL_CALL_END", "toolCallId": id}));
            }
            events.push(json!({"type": "RUN_FINISHED"}));
            sse(&events)
        }),
    );
    let endpoint = bridge_to(agent).await;

    let binder = StateBinder::subscribe(&endpoint, ADVISOR, json!({})).unwrap();
    binder
        .register_action(ActionDeclaration::new("render_chart"), |args: Value| async move {
            Ok(json!({"shown": args["n"]}))
        })
        .unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(10), binder.send_message("Chart everything"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome, TurnOutcome::Completed);

    let transcript = binder.transcript();
    assert_eq!(transcript.iter().filter(|m| m.role == Role::Tool).count(), 24);
    assert_eq!(transcript.last().unwrap().content, "24 charts");
}

#[tokio::test]
async fn test_agent_side_tool_is_shown_but_not_answered() {
    let agent = Router::new().route(
        "/agui",
        post(|| async {
            sse(&[
                json!({"type": "RUN_STARTED"}),
                json!({"type": "TOOL_CALL_START", "toolCallId": "s1", "toolCallName": "search_news"}),
                json!({"type": "TOOL_CALL_ARGS", "toolCallId": "s1", "delta": "{\"q\":\"TSLA\"}"}),
                json!({"type": "TOOL_CALL_END", "toolCallId": "s1"}),
                json!({"type": "TOOL_CALL_RESULT", "toolCallId": "s1", "messageId": "x", "content": "{\"headlines\":3}"}),
                json!({"type": "TEXT_MESSAGE_CHUNK", "messageId": "m1", "delta": "Found 3 headlines."}),
                json!({"type": "RUN_FINISHED"}),
            ])
        }),
    );
    let endpoint = bridge_to(agent).await;

    let binder = StateBinder::subscribe(&endpoint, ADVISOR, json!({})).unwrap();
    let outcome = binder.send_message("Any news?").await.unwrap();
    assert!(outcome.is_completed());

    let transcript = binder.transcript();
    assert_eq!(transcript.len(), 3);
    assert_eq!(transcript[1].role, Role::Tool);
    assert_eq!(transcript[1].action_call_id.as_deref(), Some("s1"));
    assert_eq!(transcript[2].content, "Found 3 headlines.");
}

#[tokio::test]
async fn test_agent_failure_mid_run_keeps_earlier_updates() {
    let agent = Router::new().route(
        "/agui",
        post(|| async {
            sse(&[
                json!({"type": "RUN_STARTED"}),
                json!({"type": "STATE_SNAPSHOT", "snapshot": {"latest_stock_price": 250}}),
                json!({"type": "RUN_ERROR", "message": "market data provider down"}),
            ])
        }),
    );
    let endpoint = bridge_to(agent).await;

    let binder = StateBinder::subscribe(&endpoint, ADVISOR, json!({})).unwrap();
    let outcome = binder.send_message("Research Tesla").await.unwrap();

    match outcome {
        TurnOutcome::Failed { kind, message } => {
            assert_eq!(kind, ErrorKind::StreamError);
            assert!(message.contains("market data provider down"));
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(binder.live_state().get("latest_stock_price"), Some(&json!(250)));
}

#[tokio::test]
async fn test_overloaded_agent_is_reported_unavailable() {
    let agent = Router::new().route(
        "/agui",
        post(|| async { StatusCode::SERVICE_UNAVAILABLE }),
    );
    let endpoint = bridge_to(agent).await;

    let binder = StateBinder::subscribe(&endpoint, ADVISOR, json!({})).unwrap();
    let err = binder.send_message("hi").await.unwrap_err();

    assert_eq!(err.kind(), Some(ErrorKind::AdapterUnavailable));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_rejected_run_keeps_user_message_on_both_sides() {
    let requests = Arc::new(Mutex::new(Vec::<Value>::new()));
    let seen = requests.clone();
    let agent = Router::new().route(
        "/agui",
        post(move |axum::Json(body): axum::Json<Value>| {
            let seen = seen.clone();
            async move {
                let first = {
                    let mut seen = seen.lock().unwrap();
                    seen.push(body);
                    seen.len() == 1
                };
                if first {
                    (StatusCode::UNPROCESSABLE_ENTITY, "bad input").into_response()
                } else {
                    sse(&[
                        json!({"type": "TEXT_MESSAGE_CHUNK", "messageId": "m1", "delta": "ok"}),
                        json!({"type": "RUN_FINISHED"}),
                    ])
                }
            }
        }),
    );
    let endpoint = bridge_to(agent).await;

    let binder = StateBinder::subscribe(&endpoint, ADVISOR, json!({})).unwrap();
    let outcome = binder.send_message("first").await.unwrap();
    assert!(matches!(
        outcome,
        TurnOutcome::Failed {
            kind: ErrorKind::StreamError,
            ..
        }
    ));
    assert_eq!(binder.transcript().len(), 1);

    assert!(binder.send_message("second").await.unwrap().is_completed());

    // The agent sees the same history the UI shows
    let requests = requests.lock().unwrap().clone();
    let sent: Vec<&str> = requests[1]["messages"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|m| m["content"].as_str())
        .collect();
    assert_eq!(sent, vec!["first", "second"]);

    let shown: Vec<String> = binder.transcript().into_iter().map(|m| m.content).collect();
    assert_eq!(shown, vec!["first", "second", "ok"]);
}
