//! System prompt generation and caching.
//!
//! The prompt depends only on the tool set and a few textual settings, so
//! it is built once per distinct combination and shared across turns and
//! sessions. The cache keeps the most recent version only.

use agentrelay_config::Language;
use agentrelay_core::provider::ToolDefinition;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::dispatch::INTROSPECTION_TOOL;

/// Settings that shape the generated prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptSettings {
    pub custom_prompt: Option<String>,
    pub language: Language,
}

/// The two prompt variants: the detailed one carries worked examples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptPair {
    pub detailed: String,
    pub simple: String,
}

struct PromptCacheEntry {
    version: String,
    prompts: Arc<PromptPair>,
}

/// Memoizes the generated system prompt.
#[derive(Default)]
pub struct PromptCache {
    entry: RwLock<Option<PromptCacheEntry>>,
}

impl PromptCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the prompt pair for this tool set, building it on a miss.
    pub async fn get_or_build(
        &self,
        backend: &[ToolDefinition],
        frontend: &[ToolDefinition],
        settings: &PromptSettings,
    ) -> Arc<PromptPair> {
        let version = prompt_version(backend, frontend, settings);

        {
            let guard = self.entry.read().await;
            if let Some(entry) = guard.as_ref()
                && entry.version == version
            {
                return entry.prompts.clone();
            }
        }

        let mut guard = self.entry.write().await;
        if let Some(entry) = guard.as_ref()
            && entry.version == version
        {
            return entry.prompts.clone();
        }

        debug!(version = %version, "Building system prompt");
        let prompts = Arc::new(build_prompts(backend, frontend, settings));
        *guard = Some(PromptCacheEntry {
            version,
            prompts: prompts.clone(),
        });
        prompts
    }

    /// The version currently cached, if any.
    pub async fn version(&self) -> Option<String> {
        self.entry.read().await.as_ref().map(|e| e.version.clone())
    }
}

/// SHA-256 over the sorted tool names, the custom prompt, and the language.
pub fn prompt_version(
    backend: &[ToolDefinition],
    frontend: &[ToolDefinition],
    settings: &PromptSettings,
) -> String {
    let mut names: Vec<&str> = backend
        .iter()
        .chain(frontend)
        .map(|t| t.name.as_str())
        .chain(std::iter::once(INTROSPECTION_TOOL))
        .collect();
    names.sort_unstable();

    let mut hasher = Sha256::new();
    for name in names {
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
    }
    hasher.update([1u8]);
    hasher.update(settings.custom_prompt.as_deref().unwrap_or("").as_bytes());
    hasher.update([1u8]);
    hasher.update(settings.language.code().as_bytes());
    format!("{:x}", hasher.finalize())
}

// ── Prompt text ──

struct Phrases {
    intro: &'static str,
    format_header: &'static str,
    format_rules: &'static str,
    tools_header: &'static str,
    frontend_header: &'static str,
    introspection: &'static str,
    examples_header: &'static str,
}

static EN: Phrases = Phrases {
    intro: "You are an assistant that solves tasks step by step, using tools when they help.",
    format_header: "## Reply format",
    format_rules: "Write one step per reply using these line markers:\n\
THINK: your reasoning about what to do next\n\
ACTION: tool_name(arg1, arg2, ...)  (arguments are JSON literals in the listed parameter order)\n\
ANSWER: the final answer for the user (ends the task)\n\
ASK: a question for the user when you cannot continue without them\n\
After an ACTION, stop and wait: the tool result arrives as the next message. \
Never invent tool results.",
    tools_header: "## Tools",
    frontend_header: "## Tools run in the user's client",
    introspection: "tool_info(name): show the description and parameters of a tool",
    examples_header: "## Examples",
};

static ZH: Phrases = Phrases {
    intro: "你是一个逐步解决任务的助手，在需要时调用工具。",
    format_header: "## 回复格式",
    format_rules: "每次回复只写一步，使用以下行标记：\n\
THINK: 你对下一步的思考\n\
ACTION: tool_name(arg1, arg2, ...)（参数为 JSON 字面量，按参数列表顺序）\n\
ANSWER: 给用户的最终答案（结束任务）\n\
ASK: 无法继续时向用户提出的问题\n\
写出 ACTION 后请停止，工具结果会作为下一条消息返回。不要编造工具结果。",
    tools_header: "## 工具",
    frontend_header: "## 在用户客户端执行的工具",
    introspection: "tool_info(name)：查看某个工具的说明与参数",
    examples_header: "## 示例",
};

fn phrases(language: Language) -> &'static Phrases {
    match language {
        Language::English => &EN,
        Language::Chinese => &ZH,
    }
}

fn signature(tool: &ToolDefinition) -> String {
    format!("{}({})", tool.name, tool.parameter_names().join(", "))
}

fn tool_line(tool: &ToolDefinition) -> String {
    if tool.description.is_empty() {
        format!("- {}", signature(tool))
    } else {
        format!("- {}: {}", signature(tool), tool.description)
    }
}

fn example_value(schema: Option<&serde_json::Value>) -> &'static str {
    match schema.and_then(|s| s.get("type")).and_then(|t| t.as_str()) {
        Some("number") | Some("integer") => "1",
        Some("boolean") => "true",
        Some("array") => "[]",
        Some("object") => "{}",
        _ => "\"...\"",
    }
}

fn example_invocation(tool: &ToolDefinition) -> String {
    let props = tool.parameters.get("properties");
    let args: Vec<&str> = tool
        .parameter_names()
        .iter()
        .map(|name| example_value(props.and_then(|p| p.get(name))))
        .collect();
    format!("ACTION: {}({})", tool.name, args.join(", "))
}

fn build_prompts(
    backend: &[ToolDefinition],
    frontend: &[ToolDefinition],
    settings: &PromptSettings,
) -> PromptPair {
    let p = phrases(settings.language);

    let mut simple = String::new();
    if let Some(custom) = settings.custom_prompt.as_deref().filter(|c| !c.trim().is_empty()) {
        simple.push_str(custom.trim());
        simple.push_str("\n\n");
    }
    simple.push_str(p.intro);
    simple.push_str("\n\n");
    simple.push_str(p.format_header);
    simple.push('\n');
    simple.push_str(p.format_rules);
    simple.push_str("\n\n");
    simple.push_str(p.tools_header);
    simple.push('\n');
    for tool in backend {
        simple.push_str(&tool_line(tool));
        simple.push('\n');
    }
    simple.push_str("- ");
    simple.push_str(p.introspection);
    simple.push('\n');
    if !frontend.is_empty() {
        simple.push('\n');
        simple.push_str(p.frontend_header);
        simple.push('\n');
        for tool in frontend {
            simple.push_str(&tool_line(tool));
            simple.push('\n');
        }
    }

    let mut detailed = simple.clone();
    if !backend.is_empty() {
        detailed.push('\n');
        detailed.push_str(p.examples_header);
        detailed.push('\n');
        for tool in backend {
            detailed.push_str(&example_invocation(tool));
            detailed.push('\n');
        }
    }

    PromptPair {
        detailed: detailed.trim_end().to_string(),
        simple: simple.trim_end().to_string(),
    }
}
