//! HTTP gateway for AgentRelay.
//!
//! Exposes the turn surface over axum: blocking and SSE chat, frontend
//! result submission, session management, and a domain-event stream.

pub mod api_v1;

use axum::extract::DefaultBodyLimit;
use axum::http::{Method, header};
use axum::{Router, response::Json, routing::get};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use agentrelay_agent::{AgentLoop, SessionStore};
use agentrelay_config::AppConfig;
use agentrelay_core::event::EventBus;

/// Build the full router: `/health` plus the v1 API under `/v1`.
///
/// Layers: 1 MB body limit, CORS for browser clients, HTTP trace logging.
pub fn build_router(state: api_v1::SharedApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .max_age(std::time::Duration::from_secs(3600));

    Router::new()
        .route("/health", get(health_handler))
        .nest("/v1", api_v1::v1_router(state))
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Build the agent and its collaborators from configuration.
pub fn build_agent(config: &AppConfig) -> Arc<AgentLoop> {
    let provider = agentrelay_providers::build_from_config(config);
    let tools = Arc::new(agentrelay_tools::registry_from_config(config));
    let event_bus = Arc::new(EventBus::default());
    let sessions = Arc::new(SessionStore::from_config(&config.session).with_event_bus(event_bus.clone()));
    Arc::new(AgentLoop::from_config(provider, tools, sessions, event_bus, config))
}

/// Start the gateway HTTP server.
///
/// Builds provider, tools, sessions and the agent once, runs the session
/// expiry sweeper in the background, and serves until Ctrl-C.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let agent = build_agent(&config);
    let shutdown = CancellationToken::new();
    let sweeper = config
        .session
        .expiry_enabled
        .then(|| agent.spawn_sweeper(shutdown.clone()));

    let app = build_router(Arc::new(api_v1::ApiV1State::new(agent)));

    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    shutdown.cancel();
    if let Some(handle) = sweeper {
        let _ = handle.await;
    }
    Ok(())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
