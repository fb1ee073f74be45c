//! Tool trait: the abstraction over callable capabilities.
//!
//! Backend tools are registered explicitly in a [`ToolRegistry`]. The
//! dispatcher resolves a call to a [`ToolDefinition`], binds the arguments
//! into [`ToolArgs`], and hands both to a [`ToolInvoker`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use crate::error::ToolError;
use crate::provider::ToolDefinition;

/// One bound parameter. `value == None` is the explicit "missing" marker
/// for a declared parameter the caller did not supply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArgSlot {
    pub name: String,
    pub value: Option<serde_json::Value>,
}

/// Arguments bound to a tool's declared parameters, in declared order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolArgs {
    slots: Vec<ArgSlot>,
}

impl ToolArgs {
    pub fn new(slots: Vec<ArgSlot>) -> Self {
        Self { slots }
    }

    /// Convenience constructor for tests and direct calls.
    pub fn from_pairs<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, serde_json::Value)>,
        K: Into<String>,
    {
        Self {
            slots: pairs
                .into_iter()
                .map(|(name, value)| ArgSlot {
                    name: name.into(),
                    value: Some(value),
                })
                .collect(),
        }
    }

    /// The supplied value for `name`, if present.
    pub fn get(&self, name: &str) -> Option<&serde_json::Value> {
        self.slots
            .iter()
            .find(|s| s.name == name)
            .and_then(|s| s.value.as_ref())
    }

    /// The supplied value for `name`, or an `InvalidArguments` error.
    pub fn require(&self, name: &str) -> Result<&serde_json::Value, ToolError> {
        self.get(name)
            .ok_or_else(|| ToolError::InvalidArguments(format!("missing argument '{name}'")))
    }

    /// Names of declared parameters the caller did not supply.
    pub fn missing(&self) -> Vec<&str> {
        self.slots
            .iter()
            .filter(|s| s.value.is_none())
            .map(|s| s.name.as_str())
            .collect()
    }

    pub fn slots(&self) -> &[ArgSlot] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Supplied arguments as a JSON object keyed by parameter name.
    pub fn to_object(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = self
            .slots
            .iter()
            .filter_map(|s| s.value.clone().map(|v| (s.name.clone(), v)))
            .collect();
        serde_json::Value::Object(map)
    }
}

/// The result of a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the tool executed successfully
    pub success: bool,

    /// The output content
    pub output: String,

    /// Optional structured data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            data: None,
        }
    }

    pub fn failed(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Per-call execution context handed to tools.
#[derive(Debug, Clone, Default)]
pub struct InvocationContext {
    /// Session the call belongs to
    pub session_id: String,
    /// Loop step that issued the call
    pub step: usize,
    /// Call id (provider id in structured mode)
    pub call_id: String,
}

/// A short listing entry for a registered tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSummary {
    pub name: String,
    pub description: String,
}

/// The core Tool trait.
///
/// Each backend tool implements this trait and is registered by hand in a
/// [`ToolRegistry`].
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "calculator").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters. The order of
    /// `properties` is the positional order used by directive calls.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with bound arguments.
    async fn execute(
        &self,
        args: ToolArgs,
        ctx: &InvocationContext,
    ) -> std::result::Result<ToolResult, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the model.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// Executes a resolved tool definition.
///
/// The registry implements this for local tools; tests and embedders can
/// swap in their own executor.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke(
        &self,
        definition: &ToolDefinition,
        args: ToolArgs,
        ctx: &InvocationContext,
    ) -> std::result::Result<ToolResult, ToolError>;
}

/// A registry of available backend tools, ordered by name.
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// Look up the definition for a tool name.
    pub fn lookup(&self, name: &str) -> Option<ToolDefinition> {
        self.tools.get(name).map(|t| t.to_definition())
    }

    /// Get all tool definitions (for sending to the model).
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.to_definition()).collect()
    }

    /// Name and description of every tool.
    pub fn summaries(&self) -> Vec<ToolSummary> {
        self.tools
            .values()
            .map(|t| ToolSummary {
                name: t.name().to_string(),
                description: t.description().to_string(),
            })
            .collect()
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolInvoker for ToolRegistry {
    async fn invoke(
        &self,
        definition: &ToolDefinition,
        args: ToolArgs,
        ctx: &InvocationContext,
    ) -> std::result::Result<ToolResult, ToolError> {
        let tool = self
            .tools
            .get(&definition.name)
            .ok_or_else(|| ToolError::NotFound(definition.name.clone()))?;
        tool.execute(args, ctx).await
    }
}
