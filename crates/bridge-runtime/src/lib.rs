//! Runtime for relaying agent turns

mod recorder;
pub mod registry;
pub mod runtime;

pub use registry::{RegistryBuilder, RuntimeRegistry};
pub use runtime::{Runtime, RuntimeBuilder, TurnStream};

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_adapter::{ScriptStep, ScriptedAdapter};
    use bridge_core::action::skipped_result;
    use bridge_core::config::{RetryConfig, TimeoutConfig};
    use bridge_core::{
        ActionDeclaration, ActionResultPayload, AdapterInput, AdapterRequest, AdapterSession,
        AgentAdapter, AgentName, ConversationId, Error, ErrorKind, Result, Role, StatePatch,
        StreamEvent, TurnId, TurnRequest,
    };
    use bridge_session::{InMemorySessionService, Session};
    use futures::StreamExt;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    const AGENT: &str = "investment_advisor_team";

    fn runtime_with(adapter: Arc<dyn AgentAdapter>) -> Runtime {
        let registry = RuntimeRegistry::builder()
            .register(AgentName::parse(AGENT).unwrap(), adapter)
            .build()
            .unwrap();
        Runtime::builder()
            .registry(registry)
            .session_service(Arc::new(InMemorySessionService::new()))
            .timeouts(TimeoutConfig {
                adapter_ms: 200,
                action_ms: 100,
                connect_ms: 100,
            })
            .retry(RetryConfig {
                max_attempts: 3,
                initial_backoff_ms: 5,
            })
            .build()
            .unwrap()
    }

    fn turn(message: &str) -> TurnRequest {
        TurnRequest::new(
            AgentName::parse(AGENT).unwrap(),
            ConversationId::parse("c1").unwrap(),
            message,
        )
    }

    fn delta(message_id: &str, text: &str) -> StreamEvent {
        StreamEvent::MessageDelta {
            message_id: message_id.into(),
            role: Role::Agent,
            delta: text.into(),
        }
    }

    fn action_call(id: &str, name: &str) -> StreamEvent {
        StreamEvent::ActionCall {
            action_call_id: id.into(),
            name: name.into(),
            arguments: json!({"ticker": "TSLA"}),
        }
    }

    async fn run(runtime: &Runtime, request: TurnRequest) -> Vec<StreamEvent> {
        let turn = runtime
            .start_turn(request, CancellationToken::new())
            .await
            .unwrap();
        turn.events.collect().await
    }

    async fn session(runtime: &Runtime) -> Arc<Session> {
        runtime
            .sessions()
            .get(&ConversationId::parse("c1").unwrap())
            .await
            .unwrap()
    }

    fn assert_error(event: &StreamEvent, expected: ErrorKind) {
        match event {
            StreamEvent::Error { kind, .. } => assert_eq!(*kind, expected),
            other => panic!("expected {} error, got {:?}", expected, other),
        }
    }

    struct SlowAdapter;

    #[async_trait]
    impl AgentAdapter for SlowAdapter {
        fn protocol(&self) -> &str {
            "slow"
        }

        async fn open(&self, _request: AdapterRequest) -> Result<AdapterSession> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Err(Error::stream_error("too late"))
        }
    }

    struct RejectingAdapter;

    #[async_trait]
    impl AgentAdapter for RejectingAdapter {
        fn protocol(&self) -> &str {
            "rejecting"
        }

        async fn open(&self, _request: AdapterRequest) -> Result<AdapterSession> {
            Err(Error::stream_error("agent rejected the run"))
        }
    }

    #[tokio::test]
    async fn test_research_tesla_scenario() {
        let runtime = runtime_with(Arc::new(ScriptedAdapter::emitting([
            delta("m1", "Tesla "),
            delta("m1", "is up 3% today."),
            delta("m2", "Anything else?"),
            StreamEvent::SessionEnd,
        ])));

        let turn = runtime
            .start_turn(turn("Research Tesla"), CancellationToken::new())
            .await
            .unwrap();
        assert!(turn.created);
        assert_eq!(turn.conversation_id.as_str(), "c1");

        let events: Vec<StreamEvent> = turn.events.collect().await;
        assert!(
            events
                .iter()
                .any(|e| matches!(e, StreamEvent::MessageDelta { .. }))
        );
        assert_eq!(events.last(), Some(&StreamEvent::SessionEnd));

        let view = runtime
            .session_view(&ConversationId::parse("c1").unwrap())
            .await
            .unwrap();
        let contents: Vec<(Role, &str)> = view
            .transcript
            .iter()
            .map(|m| (m.role, m.content.as_str()))
            .collect();
        assert_eq!(
            contents,
            vec![
                (Role::User, "Research Tesla"),
                (Role::Agent, "Tesla is up 3% today."),
                (Role::Agent, "Anything else?"),
            ]
        );
        assert!(!view.busy);
    }

    #[tokio::test]
    async fn test_snapshot_then_delta() {
        let runtime = runtime_with(Arc::new(ScriptedAdapter::emitting([
            StreamEvent::StateSnapshot {
                snapshot: json!({"latest_stock_price": 250}),
            },
            StreamEvent::StateDelta {
                delta: StatePatch::Merge(json!({"latest_stock_price": 255})),
            },
            StreamEvent::SessionEnd,
        ])));
        run(&runtime, turn("price?")).await;
        assert_eq!(
            session(&runtime).await.shared_state().get("latest_stock_price"),
            Some(&json!(255))
        );

        let runtime = runtime_with(Arc::new(ScriptedAdapter::emitting([
            StreamEvent::StateSnapshot {
                snapshot: json!({"latest_stock_price": 250}),
            },
            StreamEvent::SessionEnd,
        ])));
        run(&runtime, turn("price?")).await;
        assert_eq!(
            session(&runtime).await.shared_state().get("latest_stock_price"),
            Some(&json!(250))
        );
    }

    #[tokio::test]
    async fn test_silent_agent_times_out_and_frees_lock() {
        let runtime = runtime_with(Arc::new(ScriptedAdapter::new(vec![ScriptStep::Hang])));

        let events = run(&runtime, turn("hello")).await;
        assert_eq!(events.len(), 1);
        assert_error(&events[0], ErrorKind::Timeout);

        assert!(session(&runtime).await.try_begin_turn(TurnId::new()).is_some());
    }

    #[tokio::test]
    async fn test_slow_open_times_out_in_band() {
        let runtime = runtime_with(Arc::new(SlowAdapter));

        let events = run(&runtime, turn("hello")).await;
        assert_eq!(events.len(), 1);
        assert_error(&events[0], ErrorKind::Timeout);

        // The client saw HTTP 200 and keeps the message, so the session does too
        let session = session(&runtime).await;
        let transcript = session.transcript();
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript[0].role, Role::User);
        assert_eq!(transcript[0].content, "hello");
        assert!(!session.is_busy());
    }

    #[tokio::test]
    async fn test_rejected_open_is_in_band_error() {
        let runtime = runtime_with(Arc::new(RejectingAdapter));

        let events = run(&runtime, turn("hello")).await;
        assert_eq!(events.len(), 1);
        assert_error(&events[0], ErrorKind::StreamError);

        let transcript = session(&runtime).await.transcript();
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript[0].content, "hello");
    }

    #[tokio::test]
    async fn test_cancel_ends_turn_and_keeps_partial_text() {
        let adapter = ScriptedAdapter::new(vec![
            ScriptStep::Emit(delta("m1", "Looking at Tesla")),
            ScriptStep::Hang,
        ]);
        let stats = adapter.stats();
        let runtime = runtime_with(Arc::new(adapter));
        let cancel = CancellationToken::new();

        let mut turn = runtime
            .start_turn(turn("Research Tesla"), cancel.clone())
            .await
            .unwrap();
        assert!(matches!(
            turn.events.next().await,
            Some(StreamEvent::MessageDelta { .. })
        ));

        cancel.cancel();
        let terminal = turn.events.next().await.unwrap();
        assert_error(&terminal, ErrorKind::Cancelled);

        let session = session(&runtime).await;
        assert!(session.try_begin_turn(TurnId::new()).is_some());
        assert_eq!(session.transcript()[1].content, "Looking at Tesla");

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(stats.cancelled(), 1);
    }

    #[tokio::test]
    async fn test_dropped_stream_releases_lock() {
        let runtime = runtime_with(Arc::new(ScriptedAdapter::new(vec![
            ScriptStep::Emit(delta("m1", "partial")),
            ScriptStep::Hang,
        ])));

        let mut turn = runtime
            .start_turn(turn("hello"), CancellationToken::new())
            .await
            .unwrap();
        turn.events.next().await;
        drop(turn);

        let session = session(&runtime).await;
        assert!(!session.is_busy());
        assert_eq!(session.transcript().len(), 2);
    }

    #[tokio::test]
    async fn test_late_events_from_cancelled_turn_are_discarded() {
        let adapter = ScriptedAdapter::new(vec![
            ScriptStep::Emit(delta("m1", "first")),
            ScriptStep::Delay(Duration::from_millis(50)),
            ScriptStep::Emit(StreamEvent::StateSnapshot {
                snapshot: json!({"latest_stock_price": 999}),
            }),
            ScriptStep::Emit(StreamEvent::SessionEnd),
        ])
        .ignoring_cancellation();
        let stats = adapter.stats();
        let runtime = runtime_with(Arc::new(adapter));
        let cancel = CancellationToken::new();

        let mut turn = runtime
            .start_turn(turn("hello"), cancel.clone())
            .await
            .unwrap();
        turn.events.next().await;
        cancel.cancel();
        assert_error(&turn.events.next().await.unwrap(), ErrorKind::Cancelled);
        drop(turn);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(stats.late_events_dropped() >= 1);
        assert_eq!(
            session(&runtime).await.shared_state().get("latest_stock_price"),
            None
        );
    }

    #[tokio::test]
    async fn test_unknown_agent_never_calls_adapter() {
        let adapter = ScriptedAdapter::emitting([StreamEvent::SessionEnd]);
        let stats = adapter.stats();
        let runtime = runtime_with(Arc::new(adapter));

        let request = TurnRequest::new(
            AgentName::parse("stock_price_agent").unwrap(),
            ConversationId::parse("c1").unwrap(),
            "hello",
        );
        let err = runtime
            .start_turn(request, CancellationToken::new())
            .await
            .err()
            .unwrap();

        assert_eq!(err.kind(), ErrorKind::UnknownAgent);
        assert_eq!(stats.opens(), 0);
        assert_eq!(runtime.sessions().len().await, 0);
    }

    #[tokio::test]
    async fn test_second_turn_waits_for_first() {
        let runtime = Arc::new(runtime_with(Arc::new(ScriptedAdapter::new(vec![
            ScriptStep::Delay(Duration::from_millis(50)),
            ScriptStep::Emit(delta("m1", "reply")),
            ScriptStep::Emit(StreamEvent::SessionEnd),
        ]))));

        let first = runtime
            .start_turn(turn("first"), CancellationToken::new())
            .await
            .unwrap();

        let queued = {
            let runtime = runtime.clone();
            tokio::spawn(async move {
                let turn = runtime
                    .start_turn(turn("second"), CancellationToken::new())
                    .await
                    .unwrap();
                turn.events.collect::<Vec<_>>().await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!queued.is_finished());

        let first_events: Vec<StreamEvent> = first.events.collect().await;
        let second_events = queued.await.unwrap();
        assert_eq!(first_events.last(), Some(&StreamEvent::SessionEnd));
        assert_eq!(second_events.last(), Some(&StreamEvent::SessionEnd));

        let transcript = session(&runtime).await.transcript();
        let users: Vec<&str> = transcript
            .iter()
            .filter(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(users, vec!["first", "second"]);
        assert_eq!(transcript[1].role, Role::Agent);
        assert_eq!(transcript[3].role, Role::Agent);
    }

    #[tokio::test]
    async fn test_action_round_trip() {
        let adapter = ScriptedAdapter::new(vec![
            ScriptStep::Emit(action_call("a1", "showChart")),
            ScriptStep::AwaitInput,
            ScriptStep::Emit(delta("m1", "Chart is on screen.")),
            ScriptStep::Emit(StreamEvent::SessionEnd),
        ]);
        let stats = adapter.stats();
        let runtime = runtime_with(Arc::new(adapter));
        let request = turn("Show me TSLA").with_actions(vec![ActionDeclaration::new("showChart")]);

        let mut turn = runtime
            .start_turn(request, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(turn.events.next().await, Some(action_call("a1", "showChart")));
        assert_eq!(session(&runtime).await.pending_actions().len(), 1);

        runtime
            .resolve_action(ActionResultPayload {
                conversation_id: "c1".into(),
                action_call_id: "a1".into(),
                result: json!({"shown": true}),
            })
            .await
            .unwrap();

        let rest: Vec<StreamEvent> = turn.events.collect().await;
        assert_eq!(
            rest[0],
            StreamEvent::ActionResult {
                action_call_id: "a1".into(),
                result: json!({"shown": true})
            }
        );
        assert_eq!(rest.last(), Some(&StreamEvent::SessionEnd));
        assert_eq!(
            stats.inputs(),
            vec![AdapterInput::ActionResult {
                action_call_id: "a1".into(),
                result: json!({"shown": true})
            }]
        );

        let roles: Vec<Role> = session(&runtime)
            .await
            .transcript()
            .iter()
            .map(|m| m.role)
            .collect();
        assert_eq!(roles, vec![Role::User, Role::Tool, Role::Agent]);
    }

    #[tokio::test]
    async fn test_required_action_timeout_ends_turn() {
        let runtime = runtime_with(Arc::new(ScriptedAdapter::new(vec![
            ScriptStep::Emit(action_call("a1", "confirmTrade")),
            ScriptStep::AwaitInput,
            ScriptStep::Emit(StreamEvent::SessionEnd),
        ])));
        let request = turn("Buy TSLA")
            .with_actions(vec![ActionDeclaration::new("confirmTrade").required(true)]);

        let events = run(&runtime, request).await;
        assert_eq!(events.len(), 2);
        assert_error(&events[1], ErrorKind::Timeout);

        let session = session(&runtime).await;
        assert!(session.pending_actions().is_empty());
        assert!(!session.is_busy());
    }

    #[tokio::test]
    async fn test_optional_action_timeout_is_skipped() {
        let adapter = ScriptedAdapter::new(vec![
            ScriptStep::Emit(action_call("a1", "showChart")),
            ScriptStep::AwaitInput,
            ScriptStep::Emit(StreamEvent::SessionEnd),
        ]);
        let stats = adapter.stats();
        let runtime = runtime_with(Arc::new(adapter));
        let request = turn("Show me TSLA").with_actions(vec![ActionDeclaration::new("showChart")]);

        let events = run(&runtime, request).await;
        assert_eq!(
            events[1],
            StreamEvent::ActionResult {
                action_call_id: "a1".into(),
                result: skipped_result("timeout")
            }
        );
        assert_eq!(events.last(), Some(&StreamEvent::SessionEnd));
        assert_eq!(stats.inputs().len(), 1);
    }

    #[tokio::test]
    async fn test_agent_not_taking_results_times_out_turn() {
        // More calls than the agent's input buffer holds, none of them read
        let mut script: Vec<ScriptStep> = (0..20)
            .map(|i| ScriptStep::Emit(action_call(&format!("a{}", i), "showChart")))
            .collect();
        script.push(ScriptStep::Hang);
        let runtime = runtime_with(Arc::new(ScriptedAdapter::new(script)));
        let request = turn("Chart everything").with_actions(vec![ActionDeclaration::new("showChart")]);

        let events = tokio::time::timeout(Duration::from_secs(10), run(&runtime, request))
            .await
            .expect("turn must resolve");

        assert_error(events.last().unwrap(), ErrorKind::Timeout);
        assert!(!session(&runtime).await.is_busy());
    }

    #[tokio::test]
    async fn test_cancel_while_feeding_result_ends_turn() {
        let mut script: Vec<ScriptStep> = (0..20)
            .map(|i| ScriptStep::Emit(action_call(&format!("a{}", i), "showChart")))
            .collect();
        script.push(ScriptStep::Hang);
        let runtime = runtime_with(Arc::new(ScriptedAdapter::new(script)));
        let request = turn("Chart everything").with_actions(vec![ActionDeclaration::new("showChart")]);

        let cancel = CancellationToken::new();
        let turn = runtime.start_turn(request, cancel.clone()).await.unwrap();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1_750)).await;
            canceller.cancel();
        });

        let events: Vec<StreamEvent> =
            tokio::time::timeout(Duration::from_secs(10), turn.events.collect())
                .await
                .expect("turn must resolve");
        assert!(events.last().unwrap().is_terminal());
        assert!(!session(&runtime).await.is_busy());
    }

    #[test]
    fn test_default_agent_must_be_registered() {
        let build = |default: &str| {
            let registry = RuntimeRegistry::builder()
                .register(
                    AgentName::parse(AGENT).unwrap(),
                    Arc::new(ScriptedAdapter::emitting([StreamEvent::SessionEnd])),
                )
                .build()
                .unwrap();
            Runtime::builder()
                .registry(registry)
                .session_service(Arc::new(InMemorySessionService::new()))
                .default_agent(default)
                .build()
        };

        let runtime = build(AGENT).unwrap();
        assert_eq!(runtime.default_agent().map(|a| a.as_str()), Some(AGENT));
        assert!(matches!(build("market_analyst"), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_undeclared_action_is_relayed_only() {
        let runtime = runtime_with(Arc::new(ScriptedAdapter::emitting([
            action_call("t1", "get_current_stock_price"),
            StreamEvent::SessionEnd,
        ])));

        let events = run(&runtime, turn("price?")).await;
        assert_eq!(events.len(), 2);
        assert!(session(&runtime).await.pending_actions().is_empty());
    }

    #[tokio::test]
    async fn test_retries_unavailable_agent() {
        let adapter = ScriptedAdapter::emitting([StreamEvent::SessionEnd]).failing_first(2);
        let stats = adapter.stats();
        let runtime = runtime_with(Arc::new(adapter));

        let events = run(&runtime, turn("hello")).await;
        assert_eq!(events, vec![StreamEvent::SessionEnd]);
        assert_eq!(stats.opens(), 3);
    }

    #[tokio::test]
    async fn test_unavailable_after_retries_fails_before_stream() {
        let adapter = ScriptedAdapter::emitting([StreamEvent::SessionEnd]).failing_first(10);
        let stats = adapter.stats();
        let runtime = runtime_with(Arc::new(adapter));

        let err = runtime
            .start_turn(turn("hello"), CancellationToken::new())
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::AdapterUnavailable);
        assert_eq!(stats.opens(), 3);

        let session = session(&runtime).await;
        assert!(session.transcript().is_empty());
        assert!(!session.is_busy());
    }

    #[tokio::test]
    async fn test_stream_without_terminal_is_stream_error() {
        let runtime = runtime_with(Arc::new(ScriptedAdapter::emitting([delta("m1", "half")])));

        let events = run(&runtime, turn("hello")).await;
        assert_eq!(events.len(), 2);
        assert_error(&events[1], ErrorKind::StreamError);
        assert_eq!(session(&runtime).await.transcript()[1].content, "half");
    }

    #[tokio::test]
    async fn test_invalid_patch_is_stream_error() {
        let runtime = runtime_with(Arc::new(ScriptedAdapter::emitting([
            StreamEvent::StateDelta {
                delta: StatePatch::Operations(vec![bridge_core::PatchOperation::Remove {
                    path: "/missing".into(),
                }]),
            },
            StreamEvent::SessionEnd,
        ])));

        let events = run(&runtime, turn("hello")).await;
        assert_eq!(events.len(), 1);
        assert_error(&events[0], ErrorKind::StreamError);
    }

    #[tokio::test]
    async fn test_builder_requires_registry() {
        let result = Runtime::builder()
            .session_service(Arc::new(InMemorySessionService::new()))
            .build();
        assert!(result.is_err());
    }
}
