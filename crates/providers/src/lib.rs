//! Model provider adapters for AgentRelay.
//!
//! Every adapter implements [`agentrelay_core::Provider`]. The runtime ships
//! a single OpenAI-compatible adapter, selected from configuration by
//! [`build_from_config`].

pub mod openai_compat;

pub use openai_compat::OpenAiCompatProvider;

use agentrelay_config::AppConfig;
use agentrelay_core::Provider;
use std::sync::Arc;
use tracing::info;

/// Build the configured provider.
pub fn build_from_config(config: &AppConfig) -> Arc<dyn Provider> {
    let name = if config.base_url.contains("api.openai.com") {
        "openai"
    } else {
        "openai_compat"
    };
    info!(provider = name, base_url = %config.base_url, model = %config.default_model, "Using provider");
    Arc::new(OpenAiCompatProvider::new(
        name,
        config.base_url.clone(),
        config.api_key.clone().unwrap_or_default(),
    ))
}
