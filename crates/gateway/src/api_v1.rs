//! HTTP API v1: the turn surface of the runtime.
//!
//! Endpoints:
//!
//! - `POST   /v1/chat`                 run a turn, return the outcome
//! - `POST   /v1/chat/stream`          run a turn, stream typed events over SSE
//! - `POST   /v1/frontend/result`      deliver a frontend tool result
//! - `POST   /v1/sessions/{id}/abort`  cancel the session's in-flight turn
//! - `DELETE /v1/sessions/{id}`        drop one session
//! - `DELETE /v1/sessions`             drop every session
//! - `GET    /v1/sessions/count`       number of live sessions
//! - `GET    /v1/tools`                backend tool definitions
//! - `GET    /v1/events`               domain events over SSE

use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    routing::{delete, get, post},
};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::{BroadcastStream, ReceiverStream};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use agentrelay_agent::{AgentLoop, InputMessage, TurnEvent, TurnOutcome, TurnRequest};
use agentrelay_core::message::SessionId;
use agentrelay_core::provider::ToolDefinition;

// ── State ─────────────────────────────────────────────────────────────────

struct InFlightTurn {
    turn_id: String,
    cancel: CancellationToken,
}

/// Shared state for the v1 API.
pub struct ApiV1State {
    pub agent: Arc<AgentLoop>,
    /// Cancellation handle of the running turn, per session
    in_flight: DashMap<String, InFlightTurn>,
    pub start_time: chrono::DateTime<chrono::Utc>,
}

pub type SharedApiState = Arc<ApiV1State>;

impl ApiV1State {
    pub fn new(agent: Arc<AgentLoop>) -> Self {
        Self {
            agent,
            in_flight: DashMap::new(),
            start_time: chrono::Utc::now(),
        }
    }

    /// Register a turn for `session_id`, superseding any earlier one.
    fn begin_turn(&self, session_id: &str) -> (String, CancellationToken) {
        let turn_id = uuid::Uuid::new_v4().to_string();
        let cancel = CancellationToken::new();
        let previous = self.in_flight.insert(
            session_id.to_string(),
            InFlightTurn {
                turn_id: turn_id.clone(),
                cancel: cancel.clone(),
            },
        );
        if let Some(previous) = previous {
            warn!(session_id, "New turn supersedes an in-flight turn");
            previous.cancel.cancel();
        }
        (turn_id, cancel)
    }

    fn end_turn(&self, session_id: &str, turn_id: &str) {
        self.in_flight
            .remove_if(session_id, |_, turn| turn.turn_id == turn_id);
    }

    /// Cancel the session's running turn and its pending frontend calls.
    fn abort(&self, session_id: &str) -> bool {
        let aborted = match self.in_flight.get(session_id) {
            Some(turn) => {
                turn.cancel.cancel();
                true
            }
            None => false,
        };
        self.agent.frontend_bridge().cleanup_session(session_id);
        aborted
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }
}

// ── Router ────────────────────────────────────────────────────────────────

/// Build the v1 API router. Nest this under "/v1" in the main router.
pub fn v1_router(state: SharedApiState) -> Router {
    Router::new()
        .route("/chat", post(chat_handler))
        .route("/chat/stream", post(chat_stream_handler))
        .route("/frontend/result", post(frontend_result_handler))
        .route("/sessions", delete(clear_sessions_handler))
        .route("/sessions/count", get(session_count_handler))
        .route("/sessions/{id}", delete(delete_session_handler))
        .route("/sessions/{id}/abort", post(abort_handler))
        .route("/tools", get(list_tools_handler))
        .route("/events", get(event_stream_handler))
        .with_state(state)
}

// ── Request / Response types ──────────────────────────────────────────────

/// Body of `/v1/chat` and `/v1/chat/stream`.
///
/// `message` is shorthand for a single user message.
#[derive(Debug, Default, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub messages: Vec<InputMessage>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub frontend_tools: Vec<ToolDefinition>,
    #[serde(default)]
    pub environment: Vec<String>,
}

impl ChatRequest {
    fn into_turn(self, session_id: String, stream: bool) -> Result<TurnRequest, ApiError> {
        let mut messages = self.messages;
        if let Some(message) = self.message {
            messages.push(InputMessage::user(message));
        }
        if messages.iter().all(|m| m.content.trim().is_empty()) {
            return Err(error(StatusCode::BAD_REQUEST, "request carries no message"));
        }
        Ok(TurnRequest {
            session_id: Some(session_id),
            messages,
            model: self.model,
            stream,
            frontend_tools: self.frontend_tools,
            environment: self.environment,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct FrontendResultRequest {
    pub session_id: String,
    pub call_id: String,
    #[serde(default)]
    pub result: serde_json::Value,
    #[serde(default)]
    pub is_error: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AckResponse {
    pub ok: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CountResponse {
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ToolListResponse {
    pub tools: Vec<ToolDefinition>,
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(ErrorResponse { error: message.into() }))
}

// ── Handlers ──────────────────────────────────────────────────────────────

async fn chat_handler(
    State(state): State<SharedApiState>,
    Json(payload): Json<ChatRequest>,
) -> Result<Json<TurnOutcome>, ApiError> {
    let session_id = SessionId::from_optional(payload.session_id.as_deref()).0;
    let request = payload.into_turn(session_id.clone(), false)?;
    info!(session_id = %session_id, "v1/chat request");

    let (turn_id, cancel) = state.begin_turn(&session_id);
    let result = state.agent.run(request, cancel).await;
    state.end_turn(&session_id, &turn_id);

    result.map(Json).map_err(|e| {
        warn!(session_id = %session_id, error = %e, "Turn failed");
        error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })
}

async fn chat_stream_handler(
    State(state): State<SharedApiState>,
    Json(payload): Json<ChatRequest>,
) -> Result<Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    let session_id = SessionId::from_optional(payload.session_id.as_deref()).0;
    let request = payload.into_turn(session_id.clone(), true)?;
    info!(session_id = %session_id, "v1/chat/stream SSE request");

    let (turn_id, cancel) = state.begin_turn(&session_id);
    let (tx, rx) = mpsc::channel::<TurnEvent>(128);

    // The turn outlives this handler; the stream ends when it drops `tx`.
    let turn_state = state.clone();
    tokio::spawn(async move {
        let _ = turn_state.agent.run_with_events(request, cancel, &tx).await;
        turn_state.end_turn(&session_id, &turn_id);
    });

    let events = ReceiverStream::new(rx).map(|event| {
        let data = serde_json::to_string(&event).unwrap_or_default();
        Ok(SseEvent::default().event(event.event_type()).data(data))
    });
    let done = tokio_stream::once(Ok(SseEvent::default().data("[DONE]")));

    Ok(Sse::new(events.chain(done)).keep_alive(KeepAlive::default()))
}

async fn frontend_result_handler(
    State(state): State<SharedApiState>,
    Json(payload): Json<FrontendResultRequest>,
) -> Result<Json<AckResponse>, ApiError> {
    let accepted = state.agent.frontend_bridge().resolve(
        &payload.session_id,
        &payload.call_id,
        payload.result,
        payload.is_error,
    );
    if accepted {
        Ok(Json(AckResponse { ok: true }))
    } else {
        Err(error(StatusCode::NOT_FOUND, format!(
            "no pending frontend call '{}' for this session",
            payload.call_id
        )))
    }
}

async fn abort_handler(
    State(state): State<SharedApiState>,
    Path(session_id): Path<String>,
) -> Result<Json<AckResponse>, ApiError> {
    if state.abort(&session_id) {
        info!(session_id = %session_id, "Turn abort requested");
        Ok(Json(AckResponse { ok: true }))
    } else {
        Err(error(StatusCode::NOT_FOUND, "no running turn for this session"))
    }
}

async fn delete_session_handler(
    State(state): State<SharedApiState>,
    Path(session_id): Path<String>,
) -> Json<AckResponse> {
    state.abort(&session_id);
    let removed = state.agent.sessions().clear(&session_id);
    Json(AckResponse { ok: removed })
}

async fn clear_sessions_handler(State(state): State<SharedApiState>) -> Json<CountResponse> {
    let count = state.agent.sessions().clear_all();
    info!(count, "Cleared all sessions");
    Json(CountResponse { count })
}

async fn session_count_handler(State(state): State<SharedApiState>) -> Json<CountResponse> {
    Json(CountResponse {
        count: state.agent.sessions().count(),
    })
}

async fn list_tools_handler(State(state): State<SharedApiState>) -> Json<ToolListResponse> {
    let tools = state.agent.registry().definitions();
    Json(ToolListResponse {
        count: tools.len(),
        tools,
    })
}

async fn event_stream_handler(
    State(state): State<SharedApiState>,
) -> Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = state.agent.event_bus().subscribe();
    let stream = BroadcastStream::new(rx)
        .filter_map(|result| result.ok())
        .map(|event| {
            let data = serde_json::to_string(event.as_ref()).unwrap_or_default();
            Ok(SseEvent::default().event(event.name()).data(data))
        });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

// ── Tests ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use agentrelay_agent::{FinishReason, SessionStore};
    use agentrelay_core::error::ProviderError;
    use agentrelay_core::event::EventBus;
    use agentrelay_core::message::Message;
    use agentrelay_core::provider::{Provider, ProviderRequest, ProviderResponse};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::sync::Mutex;
    use tower::ServiceExt;

    /// Replies with each scripted text in turn, then repeats the last one.
    struct ScriptedProvider {
        replies: Mutex<Vec<String>>,
    }

    impl ScriptedProvider {
        fn new(replies: &[&str]) -> Self {
            let mut replies: Vec<String> = replies.iter().map(|r| r.to_string()).collect();
            replies.reverse();
            Self {
                replies: Mutex::new(replies),
            }
        }
    }

    #[async_trait::async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "gateway_mock"
        }

        async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            let mut replies = self.replies.lock().unwrap();
            let text = if replies.len() > 1 {
                replies.pop().unwrap()
            } else {
                replies.last().cloned().unwrap_or_default()
            };
            Ok(ProviderResponse {
                message: Message::assistant(text),
                usage: None,
                model: "mock-model".into(),
            })
        }
    }

    fn test_state(replies: &[&str]) -> SharedApiState {
        let agent = AgentLoop::new(
            Arc::new(ScriptedProvider::new(replies)),
            "mock-model",
            Arc::new(agentrelay_tools::default_registry()),
            Arc::new(SessionStore::default()),
            Arc::new(EventBus::default()),
        );
        Arc::new(ApiV1State::new(Arc::new(agent)))
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn chat_returns_outcome() {
        let state = test_state(&["ANSWER: 4"]);
        let app = v1_router(state.clone());

        let response = app
            .oneshot(post_json(
                "/chat",
                serde_json::json!({ "session_id": "s1", "message": "2+2?" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let outcome: TurnOutcome = body_json(response).await;
        assert_eq!(outcome.session_id, "s1");
        assert_eq!(outcome.content(), "4");
        assert_eq!(outcome.finish_reason, FinishReason::Stop);
        assert_eq!(state.agent.sessions().count(), 1);
        assert_eq!(state.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn chat_without_message_is_rejected() {
        let app = v1_router(test_state(&["ANSWER: x"]));
        let response = app
            .oneshot(post_json("/chat", serde_json::json!({ "message": "   " })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn chat_stream_ends_with_done_marker() {
        let app = v1_router(test_state(&["THINK: add\nACTION: add(2, 3)", "ANSWER: 5"]));

        let response = app
            .oneshot(post_json(
                "/chat/stream",
                serde_json::json!({ "session_id": "s2", "message": "2+3?" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        assert!(content_type.contains("text/event-stream"));

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8_lossy(&body);
        assert!(text.contains("event: chunk"));
        assert!(text.contains("ACTION_START"));
        assert!(text.contains("event: done"));
        assert!(text.trim_end().ends_with("data: [DONE]"));
    }

    #[tokio::test]
    async fn unknown_frontend_result_is_404() {
        let app = v1_router(test_state(&["ANSWER: x"]));
        let response = app
            .oneshot(post_json(
                "/frontend/result",
                serde_json::json!({ "session_id": "s1", "call_id": "fe_missing", "result": "blue" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn pending_frontend_result_is_accepted() {
        let state = test_state(&["ANSWER: x"]);
        let call_id = state.agent.frontend_bridge().register("s1", "pick_color");
        let response = v1_router(state.clone())
            .oneshot(post_json(
                "/frontend/result",
                serde_json::json!({ "session_id": "s1", "call_id": call_id, "result": "blue" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.agent.frontend_bridge().pending_count(), 0);
    }

    #[tokio::test]
    async fn abort_without_running_turn_is_404() {
        let app = v1_router(test_state(&["ANSWER: x"]));
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/sessions/idle/abort")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn abort_cancels_registered_turn() {
        let state = test_state(&["ANSWER: x"]);
        let (_turn_id, cancel) = state.begin_turn("busy");
        let response = v1_router(state.clone())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/sessions/busy/abort")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn session_lifecycle_endpoints() {
        let state = test_state(&["ANSWER: ok"]);
        for id in ["a", "b"] {
            v1_router(state.clone())
                .oneshot(post_json(
                    "/chat",
                    serde_json::json!({ "session_id": id, "message": "hi" }),
                ))
                .await
                .unwrap();
        }

        let count: CountResponse = body_json(
            v1_router(state.clone())
                .oneshot(Request::builder().uri("/sessions/count").body(Body::empty()).unwrap())
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(count.count, 2);

        let deleted: AckResponse = body_json(
            v1_router(state.clone())
                .oneshot(
                    Request::builder()
                        .method("DELETE")
                        .uri("/sessions/a")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap(),
        )
        .await;
        assert!(deleted.ok);

        let cleared: CountResponse = body_json(
            v1_router(state.clone())
                .oneshot(
                    Request::builder()
                        .method("DELETE")
                        .uri("/sessions")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(cleared.count, 1);
        assert_eq!(state.agent.sessions().count(), 0);
    }

    #[tokio::test]
    async fn list_tools() {
        let app = v1_router(test_state(&["ANSWER: x"]));
        let response = app
            .oneshot(Request::builder().uri("/tools").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json: ToolListResponse = body_json(response).await;
        assert_eq!(json.count, 3);
        assert!(json.tools.iter().any(|t| t.name == "calculator"));
        assert!(json.tools.iter().any(|t| t.name == "add"));
    }

    #[tokio::test]
    async fn event_stream_returns_sse() {
        let app = v1_router(test_state(&["ANSWER: x"]));
        let response = app
            .oneshot(Request::builder().uri("/events").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        assert!(content_type.contains("text/event-stream"));
    }
}
