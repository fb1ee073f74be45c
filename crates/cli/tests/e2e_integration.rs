//! End-to-end integration tests for the AgentRelay runtime.
//!
//! These tests exercise the full pipeline from user input to turn outcome:
//! directive parsing, tool dispatch, frontend round-trips, session
//! handling, and the HTTP gateway.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use agentrelay_agent::{
    AgentLoop, Compressor, ContentType, FinishReason, SessionStore, TurnEvent, TurnOutcome,
    TurnRequest,
};
use agentrelay_core::error::ProviderError;
use agentrelay_core::event::{DomainEvent, EventBus};
use agentrelay_core::message::{Message, MessageToolCall};
use agentrelay_core::provider::{
    Provider, ProviderRequest, ProviderResponse, ToolDefinition, Usage,
};
use agentrelay_tools::default_registry;
use tokio_util::sync::CancellationToken;

// ── Mock Provider ────────────────────────────────────────────────────────

/// A mock provider that returns scripted responses in sequence.
struct ScriptedProvider {
    responses: Mutex<Vec<ProviderResponse>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    fn new(responses: Vec<ProviderResponse>) -> Self {
        let mut responses = responses;
        responses.reverse();
        Self {
            responses: Mutex::new(responses),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn texts(texts: &[&str]) -> Self {
        Self::new(texts.iter().map(|t| text_response(t)).collect())
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn request(&self, index: usize) -> ProviderRequest {
        self.requests.lock().unwrap()[index].clone()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let mut requests = self.requests.lock().unwrap();
        let call = requests.len();
        requests.push(request);
        let response = self
            .responses
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| panic!("ScriptedProvider exhausted at call #{call}"));
        Ok(response)
    }
}

fn text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock".into(),
    }
}

fn tool_response(tool_calls: Vec<MessageToolCall>) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant_calls(tool_calls),
        usage: None,
        model: "mock".into(),
    }
}

fn make_tool_call(name: &str, args: serde_json::Value) -> MessageToolCall {
    MessageToolCall {
        id: format!("call_{name}"),
        name: name.to_string(),
        arguments: serde_json::to_string(&args).unwrap(),
    }
}

fn make_agent(provider: Arc<ScriptedProvider>) -> AgentLoop {
    AgentLoop::new(
        provider,
        "mock",
        Arc::new(default_registry()),
        Arc::new(SessionStore::default()),
        Arc::new(EventBus::default()),
    )
}

fn observations(request: &ProviderRequest) -> Vec<String> {
    request
        .messages
        .iter()
        .filter(|m| m.kind() == Some("observation"))
        .map(|m| m.content.clone())
        .collect()
}

// ── E2E: Reasoning loop ──────────────────────────────────────────────────

#[tokio::test]
async fn e2e_direct_answer() {
    let provider = Arc::new(ScriptedProvider::texts(&["THINK: easy\nANSWER: Paris"]));
    let agent = make_agent(provider.clone());

    let outcome = agent
        .run(
            TurnRequest::user("Capital of France?").with_session("geo"),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.content(), "Paris");
    assert_eq!(outcome.finish_reason, FinishReason::Stop);
    assert_eq!(outcome.steps, 1);
    assert_eq!(provider.calls(), 1);
    assert!(agent.sessions().contains("geo"));
}

#[tokio::test]
async fn e2e_calculator_directive_then_answer() {
    let provider = Arc::new(ScriptedProvider::texts(&[
        "THINK: I need to compute this\nACTION: calculator(\"(2 + 3) * 4\")",
        "ANSWER: The result is 20",
    ]));
    let agent = make_agent(provider.clone());

    let outcome = agent
        .run(TurnRequest::user("What is (2+3)*4?"), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.content(), "The result is 20");
    assert_eq!(outcome.steps, 2);

    let obs = observations(&provider.request(1));
    assert_eq!(obs.len(), 1);
    assert!(obs[0].starts_with("✅"), "got {}", obs[0]);
    assert!(obs[0].contains("20"));
}

#[tokio::test]
async fn e2e_structured_tool_call() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        tool_response(vec![make_tool_call(
            "add",
            serde_json::json!({ "a": 19, "b": 23 }),
        )]),
        text_response("ANSWER: 42"),
    ]));
    let agent = make_agent(provider.clone());

    let outcome = agent
        .run(TurnRequest::user("19 + 23?"), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.content(), "42");
    let second = provider.request(1);
    let obs: Vec<&Message> = second
        .messages
        .iter()
        .filter(|m| m.kind() == Some("observation"))
        .collect();
    assert_eq!(obs.len(), 1);
    assert_eq!(obs[0].tool_call_id.as_deref(), Some("call_add"));
    assert!(obs[0].content.contains("42"));
}

#[tokio::test]
async fn e2e_failed_tool_is_reported_and_loop_continues() {
    let provider = Arc::new(ScriptedProvider::texts(&[
        "THINK: divide\nACTION: calculator(\"1 / 0\")",
        "ANSWER: Division by zero is undefined",
    ]));
    let agent = make_agent(provider.clone());

    let outcome = agent
        .run(TurnRequest::user("1/0?"), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.finish_reason, FinishReason::Stop);
    let obs = observations(&provider.request(1));
    assert!(obs[0].starts_with("❌"), "got {}", obs[0]);
}

#[tokio::test]
async fn e2e_tool_introspection() {
    let provider = Arc::new(ScriptedProvider::texts(&[
        "THINK: what does add take?\nACTION: tool_info(\"add\")",
        "ANSWER: add takes a and b",
    ]));
    let agent = make_agent(provider.clone());

    agent
        .run(TurnRequest::user("How do I add?"), CancellationToken::new())
        .await
        .unwrap();

    let obs = observations(&provider.request(1));
    assert!(obs[0].contains("\"a\""));
    assert!(obs[0].contains("\"b\""));
}

#[tokio::test]
async fn e2e_ask_then_follow_up_in_same_session() {
    let provider = Arc::new(ScriptedProvider::texts(&[
        "THINK: ambiguous\nASK: Which city do you mean?",
        "ANSWER: It is sunny in Lisbon",
    ]));
    let agent = make_agent(provider.clone());

    let first = agent
        .run(
            TurnRequest::user("What's the weather?").with_session("trip"),
            CancellationToken::new(),
        )
        .await
        .unwrap();
    assert!(first.is_question());
    assert_eq!(first.content(), "Which city do you mean?");

    let second = agent
        .run(
            TurnRequest::user("Lisbon").with_session("trip"),
            CancellationToken::new(),
        )
        .await
        .unwrap();
    assert!(!second.is_question());

    let history = &provider.request(1).messages;
    assert!(history.iter().any(|m| m.content.contains("What's the weather?")));
    assert!(history.iter().any(|m| m.content == "Lisbon"));
}

#[tokio::test]
async fn e2e_step_budget_exhaustion() {
    let provider = Arc::new(ScriptedProvider::texts(&[
        "THINK: one\nACTION: add(1, 1)",
        "THINK: two\nACTION: add(2, 2)",
    ]));
    let agent = make_agent(provider.clone()).with_max_steps(2);

    let outcome = agent
        .run(TurnRequest::user("loop"), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.finish_reason, FinishReason::Length);
    assert_eq!(provider.calls(), 2);
}

// ── E2E: Frontend tools over a stream ────────────────────────────────────

#[tokio::test]
async fn e2e_frontend_tool_round_trip() {
    let provider = Arc::new(ScriptedProvider::texts(&[
        "THINK: ask the page\nACTION: get_selection()",
        "ANSWER: You selected 'hello'",
    ]));
    let agent = Arc::new(make_agent(provider.clone()));
    let tool_def = ToolDefinition {
        name: "get_selection".into(),
        description: "Read the text currently selected in the page".into(),
        parameters: serde_json::json!({ "type": "object", "properties": {} }),
    };

    let mut rx = agent.run_stream(
        TurnRequest::user("What did I select?")
            .with_session("page")
            .with_frontend_tools(vec![tool_def])
            .streaming(),
        CancellationToken::new(),
    );

    let mut answer = String::new();
    let mut done = None;
    while let Some(event) = rx.recv().await {
        match event {
            TurnEvent::ToolCall {
                session_id,
                call_id,
                name,
                ..
            } => {
                assert_eq!(name, "get_selection");
                assert!(agent.frontend_bridge().resolve(
                    &session_id,
                    &call_id,
                    serde_json::json!("hello"),
                    false
                ));
            }
            TurnEvent::Chunk {
                content_type: ContentType::Answer,
                text,
            } => answer.push_str(&text),
            TurnEvent::Done { finish_reason, .. } => done = Some(finish_reason),
            _ => {}
        }
    }

    assert_eq!(done, Some(FinishReason::Stop));
    assert!(answer.contains("You selected"));
    let obs = observations(&provider.request(1));
    assert!(obs[0].starts_with("✅"));
    assert!(obs[0].contains("hello"));
    assert_eq!(agent.frontend_bridge().pending_count(), 0);
}

// ── E2E: Sessions ────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn e2e_idle_sessions_expire() {
    let sessions = SessionStore::new(Duration::from_secs(60), Duration::from_secs(10));
    sessions.get_or_create("stale");
    tokio::time::advance(Duration::from_secs(45)).await;
    sessions.get_or_create("fresh");
    tokio::time::advance(Duration::from_secs(30)).await;

    assert_eq!(sessions.sweep_expired(), 1);
    assert!(!sessions.contains("stale"));
    assert!(sessions.contains("fresh"));
}

#[tokio::test]
async fn e2e_long_session_is_compressed_before_the_turn() {
    let provider = Arc::new(ScriptedProvider::texts(&[
        "The user discussed travel plans at length.",
        "ANSWER: Noted",
    ]));
    let bus = Arc::new(EventBus::default());
    let mut events = bus.subscribe();
    let sessions = Arc::new(SessionStore::default());
    let filler = "word ".repeat(200);
    sessions.save(
        "long",
        (0..6)
            .flat_map(|i| {
                [
                    Message::user(format!("question {i}: {filler}")),
                    Message::assistant(format!("reply {i}: {filler}")),
                ]
            })
            .collect(),
    );

    let agent = AgentLoop::new(
        provider.clone(),
        "mock",
        Arc::new(default_registry()),
        sessions.clone(),
        bus.clone(),
    )
    .with_compressor(
        Compressor::new(provider.clone(), "mock")
            .with_thresholds(200, 50)
            .with_event_bus(bus.clone()),
    );

    let outcome = agent
        .run(
            TurnRequest::user("Remember that.").with_session("long"),
            CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(outcome.content(), "Noted");
    assert_eq!(provider.calls(), 2);

    let turn_request = provider.request(1);
    assert!(
        turn_request
            .messages
            .iter()
            .any(|m| m.content.contains("The user discussed travel plans"))
    );
    assert!(
        !turn_request
            .messages
            .iter()
            .any(|m| m.content.starts_with("question 0:"))
    );

    let mut compressed = false;
    while let Ok(event) = events.try_recv() {
        if matches!(*event, DomainEvent::SessionCompressed { .. }) {
            compressed = true;
        }
    }
    assert!(compressed);
}

// ── E2E: Gateway ─────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_gateway_chat_round_trip() {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    let provider = Arc::new(ScriptedProvider::texts(&[
        "THINK: add\nACTION: add(2, 2)",
        "ANSWER: 4",
    ]));
    let agent = Arc::new(make_agent(provider));
    let state = Arc::new(agentrelay_gateway::api_v1::ApiV1State::new(agent.clone()));
    let app = agentrelay_gateway::build_router(state);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/chat")
                .header("content-type", "application/json")
                .body(Body::from(
                    serde_json::json!({ "session_id": "http", "message": "2+2?" }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let outcome: TurnOutcome = serde_json::from_slice(&body).unwrap();
    assert_eq!(outcome.session_id, "http");
    assert_eq!(outcome.content(), "4");
    assert_eq!(outcome.steps, 2);

    let response = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/v1/sessions/http")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(!agent.sessions().contains("http"));
}
