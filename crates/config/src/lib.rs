//! Configuration loading, validation, and management for AgentRelay.
//!
//! Loads configuration from `~/.agentrelay/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.agentrelay/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the model endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL of an OpenAI-compatible endpoint
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Default model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per model response
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Reasoning loop settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// Session store settings
    #[serde(default)]
    pub session: SessionConfig,

    /// Frontend tool bridge settings
    #[serde(default)]
    pub frontend: FrontendConfig,

    /// Streaming classifier settings
    #[serde(default)]
    pub stream: StreamConfig,

    /// Gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// REST-style tools registered at startup
    #[serde(default)]
    pub remote_tools: Vec<RemoteToolConfig>,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_true() -> bool {
    true
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("agent", &self.agent)
            .field("session", &self.session)
            .field("frontend", &self.frontend)
            .field("stream", &self.stream)
            .field("gateway", &self.gateway)
            .field("remote_tools", &self.remote_tools)
            .finish()
    }
}

/// Language used for prompts and observation status phrases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Language {
    #[default]
    #[serde(rename = "en")]
    English,
    #[serde(rename = "zh")]
    Chinese,
}

impl Language {
    pub fn code(&self) -> &'static str {
        match self {
            Self::English => "en",
            Self::Chinese => "zh",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum reasoning steps per turn
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,

    /// Consecutive failures of the same action before a recovery hint
    #[serde(default = "default_failure_hint_threshold")]
    pub failure_hint_threshold: u32,

    /// Use the detailed system prompt while the session is shorter than this
    #[serde(default = "default_detailed_prompt_below")]
    pub detailed_prompt_below: usize,

    /// Prompt and status-phrase language
    #[serde(default)]
    pub language: Language,

    /// Custom instructions prepended to the generated system prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

fn default_max_steps() -> usize {
    10
}
fn default_failure_hint_threshold() -> u32 {
    2
}
fn default_detailed_prompt_below() -> usize {
    6
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            failure_hint_threshold: default_failure_hint_threshold(),
            detailed_prompt_below: default_detailed_prompt_below(),
            language: Language::default(),
            system_prompt: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Run the periodic expiry sweep
    #[serde(default = "default_true")]
    pub expiry_enabled: bool,

    /// Idle time after which a session is swept
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Sweep period
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Summarize older dialogue when the token estimate grows too large
    #[serde(default = "default_true")]
    pub compression_enabled: bool,

    /// Dialogue token estimate that triggers compression
    #[serde(default = "default_compression_threshold_tokens")]
    pub compression_threshold_tokens: usize,

    /// Token budget of the recent tail kept verbatim
    #[serde(default = "default_keep_recent_tokens")]
    pub keep_recent_tokens: usize,

    /// Output bound for the summarization call
    #[serde(default = "default_summary_max_tokens")]
    pub summary_max_tokens: u32,
}

fn default_idle_timeout_secs() -> u64 {
    1800
}
fn default_sweep_interval_secs() -> u64 {
    60
}
fn default_compression_threshold_tokens() -> usize {
    6000
}
fn default_keep_recent_tokens() -> usize {
    2000
}
fn default_summary_max_tokens() -> u32 {
    800
}

impl SessionConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            expiry_enabled: true,
            idle_timeout_secs: default_idle_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            compression_enabled: true,
            compression_threshold_tokens: default_compression_threshold_tokens(),
            keep_recent_tokens: default_keep_recent_tokens(),
            summary_max_tokens: default_summary_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrontendConfig {
    /// How long a frontend tool call may stay unresolved
    #[serde(default = "default_frontend_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_frontend_timeout_secs() -> u64 {
    30
}

impl FrontendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for FrontendConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_frontend_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Suppress ACTION chunks in streamed output
    #[serde(default)]
    pub hide_action: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,
}

fn default_port() -> u16 {
    42618
}
fn default_host() -> String {
    "127.0.0.1".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

/// A REST-style tool: arguments are POSTed as JSON to `url`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteToolConfig {
    pub name: String,

    #[serde(default)]
    pub description: String,

    pub url: String,

    /// JSON-schema object describing the parameters
    #[serde(default = "default_parameters")]
    pub parameters: serde_json::Value,

    #[serde(default = "default_remote_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_parameters() -> serde_json::Value {
    serde_json::json!({ "type": "object", "properties": {} })
}
fn default_remote_timeout_secs() -> u64 {
    30
}

impl AppConfig {
    /// Load configuration from the default path (~/.agentrelay/config.toml).
    ///
    /// Environment overrides:
    /// - `AGENTRELAY_API_KEY`, then `OPENAI_API_KEY`
    /// - `AGENTRELAY_BASE_URL`
    /// - `AGENTRELAY_MODEL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        if config.api_key.is_none() {
            config.api_key = std::env::var("AGENTRELAY_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }

        if let Ok(base_url) = std::env::var("AGENTRELAY_BASE_URL") {
            config.base_url = base_url;
        }

        if let Ok(model) = std::env::var("AGENTRELAY_MODEL") {
            config.default_model = model;
        }

        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".agentrelay")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_temperature < 0.0 || self.default_temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.agent.max_steps == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_steps must be at least 1".into(),
            ));
        }

        if self.agent.failure_hint_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "agent.failure_hint_threshold must be at least 1".into(),
            ));
        }

        if self.session.sweep_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "session.sweep_interval_secs must be > 0".into(),
            ));
        }

        if self.session.keep_recent_tokens >= self.session.compression_threshold_tokens {
            return Err(ConfigError::ValidationError(
                "session.keep_recent_tokens must be below compression_threshold_tokens".into(),
            ));
        }

        for tool in &self.remote_tools {
            if tool.name.trim().is_empty() || tool.url.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "remote_tools entries need a name and a url".into(),
                ));
            }
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string (for the `config` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            agent: AgentConfig::default(),
            session: SessionConfig::default(),
            frontend: FrontendConfig::default(),
            stream: StreamConfig::default(),
            gateway: GatewayConfig::default(),
            remote_tools: vec![],
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
