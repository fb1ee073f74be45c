//! Backend tools for AgentRelay.
//!
//! Tools are registered explicitly: [`default_registry`] holds the
//! built-ins, [`registry_from_config`] adds the REST tools declared under
//! `[[remote_tools]]`.

pub mod calculator;
pub mod rest;
pub mod time;

pub use calculator::{AddTool, CalculatorTool};
pub use rest::RestTool;
pub use time::CurrentTimeTool;

use agentrelay_config::AppConfig;
use agentrelay_core::tool::ToolRegistry;
use std::sync::Arc;
use tracing::{info, warn};

/// A registry with the built-in tools.
pub fn default_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(CalculatorTool));
    registry.register(Arc::new(AddTool));
    registry.register(Arc::new(CurrentTimeTool));
    registry
}

/// The built-ins plus every configured remote tool.
///
/// A remote tool whose name collides with a built-in is skipped.
pub fn registry_from_config(config: &AppConfig) -> ToolRegistry {
    let mut registry = default_registry();
    for remote in &config.remote_tools {
        if registry.get(&remote.name).is_some() {
            warn!(tool = %remote.name, "Remote tool shadows an existing tool; skipping");
            continue;
        }
        info!(tool = %remote.name, url = %remote.url, "Registered remote tool");
        registry.register(Arc::new(RestTool::from_config(remote)));
    }
    registry
}
