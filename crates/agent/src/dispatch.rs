//! Tool dispatch router.
//!
//! Every requested call is routed in this order:
//!
//! 1. the reserved introspection tool (`tool_info`)
//! 2. a frontend tool declared for this turn → [`FrontendBridge`]
//! 3. a registered backend tool → [`ToolInvoker`]
//!
//! Whatever happens, the caller gets an [`Observation`]; tool failures
//! never escape as errors.

use agentrelay_config::Language;
use agentrelay_core::event::{DomainEvent, EventBus};
use agentrelay_core::message::{ToolArguments, ToolCallRequest};
use agentrelay_core::provider::ToolDefinition;
use agentrelay_core::tool::{ArgSlot, InvocationContext, ToolArgs, ToolInvoker, ToolRegistry};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::frontend::{FrontendBridge, FrontendReply};
use crate::stream_event::TurnEvent;

/// Name of the reserved introspection tool.
pub const INTROSPECTION_TOOL: &str = "tool_info";

/// The definition advertised to the model for the introspection tool.
pub fn introspection_definition() -> ToolDefinition {
    ToolDefinition {
        name: INTROSPECTION_TOOL.into(),
        description: "Show the description and parameters of a tool. Call without a name to list every tool.".into(),
        parameters: json!({
            "type": "object",
            "properties": {
                "name": { "type": "string", "description": "Tool to describe" }
            }
        }),
    }
}

/// Where a call was executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Introspection,
    Frontend,
    Backend,
    Unknown,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Introspection => "introspection",
            Self::Frontend => "frontend",
            Self::Backend => "backend",
            Self::Unknown => "unknown",
        }
    }
}

/// The formatted outcome of one call.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub call_id: String,
    pub tool_name: String,
    pub route: Route,
    pub success: bool,
    /// Glyph + status phrase + result or reason
    pub text: String,
}

/// Per-call context from the loop.
pub struct DispatchContext<'a> {
    pub session_id: &'a str,
    pub step: usize,
    /// The turn's event channel; frontend calls need one
    pub events: Option<&'a mpsc::Sender<TurnEvent>>,
}

/// Routes tool calls and formats their results.
#[derive(Clone)]
pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    invoker: Arc<dyn ToolInvoker>,
    bridge: Arc<FrontendBridge>,
    language: Language,
    event_bus: Option<Arc<EventBus>>,
}

impl ToolDispatcher {
    /// Dispatcher whose backend executor is the registry itself.
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            invoker: registry.clone(),
            registry,
            bridge: Arc::new(FrontendBridge::default()),
            language: Language::default(),
            event_bus: None,
        }
    }

    pub fn with_invoker(mut self, invoker: Arc<dyn ToolInvoker>) -> Self {
        self.invoker = invoker;
        self
    }

    pub fn with_bridge(mut self, bridge: Arc<FrontendBridge>) -> Self {
        self.bridge = bridge;
        self
    }

    pub fn with_language(mut self, language: Language) -> Self {
        self.language = language;
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn bridge(&self) -> &Arc<FrontendBridge> {
        &self.bridge
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Names of every callable tool for this turn.
    pub fn known_names(&self, frontend: &[ToolDefinition]) -> Vec<String> {
        let mut names: Vec<String> = self.registry.names().into_iter().map(String::from).collect();
        names.extend(frontend.iter().map(|t| t.name.clone()));
        names.push(INTROSPECTION_TOOL.into());
        names
    }

    /// Execute one call and produce its observation.
    pub async fn dispatch(
        &self,
        call: &ToolCallRequest,
        frontend: &[ToolDefinition],
        ctx: &DispatchContext<'_>,
    ) -> Observation {
        let start = std::time::Instant::now();

        let (route, outcome) = if call.name == INTROSPECTION_TOOL {
            (Route::Introspection, self.introspect(&call.arguments, frontend))
        } else if let Some(tool_def) = frontend.iter().find(|t| t.name == call.name) {
            (Route::Frontend, self.call_frontend(call, tool_def, ctx).await)
        } else if let Some(definition) = self.registry.lookup(&call.name) {
            (Route::Backend, self.call_backend(call, &definition, ctx).await)
        } else {
            let known = self.known_names(frontend).join(", ");
            (
                Route::Unknown,
                Err(format!("unknown tool '{}'. Available tools: {known}", call.name)),
            )
        };

        let success = outcome.is_ok();
        let duration_ms = start.elapsed().as_millis() as u64;
        debug!(
            session_id = ctx.session_id,
            step = ctx.step,
            tool = %call.name,
            route = route.as_str(),
            success,
            duration_ms,
            "Tool dispatched"
        );
        if let Some(bus) = &self.event_bus {
            bus.publish(DomainEvent::ToolExecuted {
                session_id: ctx.session_id.to_string(),
                tool_name: call.name.clone(),
                route: route.as_str().to_string(),
                success,
                duration_ms,
                timestamp: chrono::Utc::now(),
            });
        }

        Observation {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            route,
            success,
            text: format_observation(self.language, &call.name, &outcome),
        }
    }

    async fn call_backend(
        &self,
        call: &ToolCallRequest,
        definition: &ToolDefinition,
        ctx: &DispatchContext<'_>,
    ) -> Result<String, String> {
        let args = reshape_arguments(definition, &call.arguments);
        let invocation = InvocationContext {
            session_id: ctx.session_id.to_string(),
            step: ctx.step,
            call_id: call.id.clone(),
        };
        match self.invoker.invoke(definition, args, &invocation).await {
            Ok(result) if result.success => Ok(render_output(&result.output, result.data.as_ref())),
            Ok(result) => Err(render_output(&result.output, result.data.as_ref())),
            Err(e) => {
                warn!(tool = %call.name, "Tool execution failed: {e}");
                Err(e.to_string())
            }
        }
    }

    async fn call_frontend(
        &self,
        call: &ToolCallRequest,
        tool_def: &ToolDefinition,
        ctx: &DispatchContext<'_>,
    ) -> Result<String, String> {
        let Some(events) = ctx.events else {
            return Err(format!(
                "frontend tool '{}' requires a streaming connection",
                call.name
            ));
        };

        let call_id = self.bridge.register(ctx.session_id, &call.name);
        let arguments = reshape_arguments(tool_def, &call.arguments).to_object();
        let notified = events
            .send(TurnEvent::ToolCall {
                session_id: ctx.session_id.to_string(),
                call_id: call_id.clone(),
                name: call.name.clone(),
                arguments,
            })
            .await;
        if notified.is_err() {
            self.bridge.cleanup_session(ctx.session_id);
            return Err("the client disconnected before the call could be delivered".into());
        }

        match self.bridge.await_result(ctx.session_id, &call_id).await {
            FrontendReply::Resolved(result) => {
                let text = render_value(&result.value);
                if result.is_error { Err(text) } else { Ok(text) }
            }
            FrontendReply::TimedOut(after) => Err(format!(
                "no result from the client within {}s",
                after.as_secs()
            )),
            FrontendReply::Cancelled => Err("the frontend call was cancelled".into()),
        }
    }

    fn introspect(
        &self,
        arguments: &ToolArguments,
        frontend: &[ToolDefinition],
    ) -> Result<String, String> {
        let requested = match arguments {
            ToolArguments::Named(map) => map
                .get("name")
                .or_else(|| map.values().next())
                .and_then(Value::as_str),
            ToolArguments::Positional(items) => items.first().and_then(Value::as_str),
        }
        .map(str::trim)
        .filter(|s| !s.is_empty());

        let describe = |def: &ToolDefinition, route: &str| {
            json!({
                "name": def.name,
                "description": def.description,
                "route": route,
                "parameters": def.parameter_names(),
                "required": def.required_parameters(),
                "schema": def.parameters,
            })
        };

        let Some(name) = requested else {
            let mut listing: Vec<Value> = self
                .registry
                .summaries()
                .into_iter()
                .map(|s| json!({ "name": s.name, "description": s.description, "route": "backend" }))
                .collect();
            listing.extend(frontend.iter().map(
                |t| json!({ "name": t.name, "description": t.description, "route": "frontend" }),
            ));
            return Ok(render_value(&Value::Array(listing)));
        };

        if let Some(def) = self.registry.lookup(name) {
            return Ok(render_value(&describe(&def, "backend")));
        }
        if let Some(def) = frontend.iter().find(|t| t.name == name) {
            return Ok(render_value(&describe(def, "frontend")));
        }
        if name == INTROSPECTION_TOOL {
            return Ok(render_value(&describe(&introspection_definition(), "introspection")));
        }
        Err(format!(
            "unknown tool '{name}'. Available tools: {}",
            self.known_names(frontend).join(", ")
        ))
    }
}

/// Bind a call's arguments to the target's declared parameters.
///
/// - one parameter: the entry named after it binds, else the whole mapping does
/// - a single mapping argument: values are picked by parameter name
/// - otherwise positional values bind in declared order
///
/// Declared parameters without a value get an explicit missing slot.
pub fn reshape_arguments(definition: &ToolDefinition, arguments: &ToolArguments) -> ToolArgs {
    let params = definition.parameter_names();

    let by_name = |map: &serde_json::Map<String, Value>| -> ToolArgs {
        if params.is_empty() {
            return ToolArgs::new(
                map.iter()
                    .map(|(k, v)| ArgSlot {
                        name: k.clone(),
                        value: Some(v.clone()),
                    })
                    .collect(),
            );
        }
        if params.len() == 1 && !map.is_empty() {
            // A mapping not keyed by the parameter is the parameter's value itself
            let value = match map.get(&params[0]) {
                Some(v) => v.clone(),
                None => Value::Object(map.clone()),
            };
            return ToolArgs::new(vec![ArgSlot {
                name: params[0].clone(),
                value: Some(value),
            }]);
        }
        ToolArgs::new(
            params
                .iter()
                .map(|p| ArgSlot {
                    name: p.clone(),
                    value: map.get(p).cloned(),
                })
                .collect(),
        )
    };

    match arguments {
        ToolArguments::Named(map) => by_name(map),
        ToolArguments::Positional(items) => match items.as_slice() {
            [Value::Object(map)] if params.len() > 1 => by_name(map),
            [Value::Object(map)] if params.len() == 1 && map.len() == 1 && map.contains_key(&params[0]) => {
                by_name(map)
            }
            _ => {
                let mut slots: Vec<ArgSlot> = params
                    .iter()
                    .enumerate()
                    .map(|(i, p)| ArgSlot {
                        name: p.clone(),
                        value: items.get(i).cloned(),
                    })
                    .collect();
                slots.extend(items.iter().enumerate().skip(params.len()).map(|(i, v)| ArgSlot {
                    name: format!("arg{i}"),
                    value: Some(v.clone()),
                }));
                ToolArgs::new(slots)
            }
        },
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

fn render_output(output: &str, data: Option<&Value>) -> String {
    match data {
        Some(data) if output.trim().is_empty() => render_value(data),
        _ => output.to_string(),
    }
}

/// Prefix a result with its status glyph and localized phrase.
pub fn format_observation(language: Language, tool: &str, outcome: &Result<String, String>) -> String {
    match (language, outcome) {
        (Language::English, Ok(body)) => format!("✅ Tool `{tool}` succeeded:\n{body}"),
        (Language::English, Err(reason)) => format!("❌ Tool `{tool}` failed: {reason}"),
        (Language::Chinese, Ok(body)) => format!("✅ 工具 `{tool}` 执行成功：\n{body}"),
        (Language::Chinese, Err(reason)) => format!("❌ 工具 `{tool}` 执行失败：{reason}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentrelay_core::error::ToolError;
    use agentrelay_core::tool::{Tool, ToolResult};
    use async_trait::async_trait;
    use std::time::Duration;

    struct Add;

    #[async_trait]
    impl Tool for Add {
        fn name(&self) -> &str {
            "add"
        }
        fn description(&self) -> &str {
            "Add two numbers"
        }
        fn parameters_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": { "a": {"type": "number"}, "b": {"type": "number"} },
                "required": ["a", "b"]
            })
        }
        async fn execute(&self, args: ToolArgs, _ctx: &InvocationContext) -> Result<ToolResult, ToolError> {
            let num = |name: &str| -> Result<f64, ToolError> {
                args.require(name)?.as_f64().ok_or_else(|| {
                    ToolError::InvalidArguments(format!("argument '{name}' is not a number"))
                })
            };
            Ok(ToolResult::ok((num("a")? + num("b")?).to_string()))
        }
    }

    fn dispatcher() -> ToolDispatcher {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Add));
        ToolDispatcher::new(Arc::new(registry))
    }

    fn ctx() -> DispatchContext<'static> {
        DispatchContext {
            session_id: "s1",
            step: 0,
            events: None,
        }
    }

    fn def(params: Value) -> ToolDefinition {
        ToolDefinition {
            name: "t".into(),
            description: String::new(),
            parameters: json!({ "type": "object", "properties": params }),
        }
    }

    #[test]
    fn single_param_single_entry_unwraps() {
        let d = def(json!({ "query": {} }));
        let args = reshape_arguments(&d, &ToolArguments::from_json_str(r#"{"query": "rust"}"#));
        assert_eq!(args.get("query"), Some(&json!("rust")));
        assert_eq!(args.len(), 1);
    }

    #[test]
    fn single_param_foreign_key_binds_whole_mapping() {
        let d = def(json!({ "payload": { "type": "object" } }));
        let args = reshape_arguments(&d, &ToolArguments::from_json_str(r#"{"city": "Paris"}"#));
        assert_eq!(args.get("payload"), Some(&json!({ "city": "Paris" })));
        assert_eq!(args.len(), 1);
        assert!(args.missing().is_empty());
    }

    #[test]
    fn mapping_extracted_in_declared_order_with_missing_marker() {
        let d = def(json!({ "to": {}, "amount": {}, "memo": {} }));
        let args = reshape_arguments(
            &d,
            &ToolArguments::Positional(vec![json!({ "amount": 5, "to": "bob" })]),
        );
        let names: Vec<&str> = args.slots().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["to", "amount", "memo"]);
        assert_eq!(args.get("to"), Some(&json!("bob")));
        assert_eq!(args.missing(), vec!["memo"]);
    }

    #[test]
    fn positional_binds_by_position() {
        let d = def(json!({ "a": {}, "b": {} }));
        let args = reshape_arguments(&d, &ToolArguments::Positional(vec![json!(2), json!(3)]));
        assert_eq!(args.get("a"), Some(&json!(2)));
        assert_eq!(args.get("b"), Some(&json!(3)));

        let short = reshape_arguments(&d, &ToolArguments::Positional(vec![json!(2)]));
        assert_eq!(short.missing(), vec!["b"]);
    }

    #[tokio::test]
    async fn backend_success_is_formatted() {
        let call = ToolCallRequest::from_directive("add", vec![json!(2), json!(3)]);
        let obs = dispatcher().dispatch(&call, &[], &ctx()).await;
        assert!(obs.success);
        assert_eq!(obs.route, Route::Backend);
        assert!(obs.text.starts_with("✅"));
        assert!(obs.text.contains('5'));
    }

    #[tokio::test]
    async fn backend_error_becomes_failure_observation() {
        let call = ToolCallRequest::from_directive("add", vec![json!("x"), json!(3)]);
        let obs = dispatcher().dispatch(&call, &[], &ctx()).await;
        assert!(!obs.success);
        assert!(obs.text.starts_with("❌"));
        assert!(obs.text.contains("not a number"));
    }

    #[tokio::test]
    async fn unknown_tool_lists_known_names() {
        let call = ToolCallRequest::from_directive("multiply", vec![]);
        let obs = dispatcher().dispatch(&call, &[], &ctx()).await;
        assert!(!obs.success);
        assert_eq!(obs.route, Route::Unknown);
        assert!(obs.text.contains("multiply"));
        assert!(obs.text.contains("add"));
        assert!(obs.text.contains(INTROSPECTION_TOOL));
    }

    #[tokio::test]
    async fn introspection_is_deterministic() {
        let d = dispatcher();
        let call = ToolCallRequest::from_directive(INTROSPECTION_TOOL, vec![json!("add")]);
        let first = d.dispatch(&call, &[], &ctx()).await;
        let second = d.dispatch(&call, &[], &ctx()).await;
        assert_eq!(first.text, second.text);
        assert_eq!(first.route, Route::Introspection);
        assert!(first.text.contains("Add two numbers"));
        assert!(first.text.contains(r#""required""#));
    }

    #[tokio::test]
    async fn chinese_status_phrases() {
        let d = dispatcher().with_language(Language::Chinese);
        let call = ToolCallRequest::from_directive("add", vec![json!(1), json!(1)]);
        let obs = d.dispatch(&call, &[], &ctx()).await;
        assert!(obs.text.starts_with("✅ 工具 `add` 执行成功"));
    }

    #[tokio::test]
    async fn frontend_without_stream_fails_fast() {
        let tool_def = ToolDefinition {
            name: "pick_file".into(),
            description: String::new(),
            parameters: json!({ "type": "object", "properties": {} }),
        };
        let call = ToolCallRequest::from_directive("pick_file", vec![]);
        let obs = dispatcher().dispatch(&call, &[tool_def], &ctx()).await;
        assert_eq!(obs.route, Route::Frontend);
        assert!(!obs.success);
        assert!(obs.text.contains("streaming"));
    }

    #[tokio::test]
    async fn frontend_call_round_trip() {
        let bridge = Arc::new(FrontendBridge::new(Duration::from_secs(5)));
        let d = dispatcher().with_bridge(bridge.clone());
        let tool_def = ToolDefinition {
            name: "confirm".into(),
            description: String::new(),
            parameters: json!({ "type": "object", "properties": { "question": {} } }),
        };
        let (tx, mut rx) = mpsc::channel(8);

        let client = tokio::spawn(async move {
            match rx.recv().await {
                Some(TurnEvent::ToolCall { call_id, arguments, .. }) => {
                    assert_eq!(arguments, json!({ "question": "Proceed?" }));
                    assert!(bridge.resolve("s1", &call_id, json!("yes"), false));
                }
                other => panic!("Expected a tool call notification, got {other:?}"),
            }
        });

        let call = ToolCallRequest::from_directive("confirm", vec![json!("Proceed?")]);
        let ctx = DispatchContext {
            session_id: "s1",
            step: 1,
            events: Some(&tx),
        };
        let obs = d.dispatch(&call, &[tool_def], &ctx).await;
        client.await.unwrap();
        assert!(obs.success);
        assert!(obs.text.ends_with("yes"));
    }
}
