//! REST-style remote tools.
//!
//! A remote tool POSTs its bound arguments as a JSON object to a configured
//! URL. A 2xx response body is the tool output; any other status is a
//! failed call carrying the status and body.

use agentrelay_config::RemoteToolConfig;
use agentrelay_core::error::ToolError;
use agentrelay_core::tool::{InvocationContext, Tool, ToolArgs, ToolResult};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// Longest response body kept in the tool output.
const MAX_BODY_CHARS: usize = 8_000;

pub struct RestTool {
    name: String,
    description: String,
    url: String,
    parameters: Value,
    timeout: Duration,
    client: reqwest::Client,
}

impl RestTool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        url: impl Into<String>,
        parameters: Value,
        timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            url: url.into(),
            parameters,
            timeout,
            client: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &RemoteToolConfig) -> Self {
        Self::new(
            config.name.clone(),
            config.description.clone(),
            config.url.clone(),
            config.parameters.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Tool for RestTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.parameters.clone()
    }

    async fn execute(&self, args: ToolArgs, ctx: &InvocationContext) -> Result<ToolResult, ToolError> {
        let missing = args.missing();
        if !missing.is_empty() {
            debug!(tool = %self.name, ?missing, "Calling remote tool with unset parameters");
        }

        let response = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .header("X-Session-Id", &ctx.session_id)
            .json(&args.to_object())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ToolError::Timeout {
                        tool_name: self.name.clone(),
                        timeout_secs: self.timeout.as_secs(),
                    }
                } else {
                    ToolError::Remote {
                        url: self.url.clone(),
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| ToolError::Remote {
            url: self.url.clone(),
            reason: e.to_string(),
        })?;
        let body = truncate(&body);

        if status.is_success() {
            Ok(ToolResult::ok(body))
        } else {
            warn!(tool = %self.name, status = status.as_u16(), "Remote tool returned error status");
            Ok(ToolResult::failed(format!("HTTP {}: {body}", status.as_u16())))
        }
    }
}

fn truncate(body: &str) -> String {
    match body.char_indices().nth(MAX_BODY_CHARS) {
        Some((cut, _)) => format!("{}…", &body[..cut]),
        None => body.to_string(),
    }
}
