//! The reasoning loop implementation.
//!
//! One turn runs up to `max_steps` model calls. Each step either ends the
//! turn (answer, question, terminal response) or executes tool calls and
//! feeds their observations back for the next step.

use agentrelay_config::{AppConfig, Language};
use agentrelay_core::error::Error;
use agentrelay_core::event::{DomainEvent, EventBus};
use agentrelay_core::message::{Message, MessageToolCall, Role, SessionId, ToolCallRequest};
use agentrelay_core::provider::{Provider, ProviderRequest, ProviderResponse, ToolDefinition};
use agentrelay_core::tool::{ToolInvoker, ToolRegistry};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::classifier::StreamClassifier;
use crate::compress::Compressor;
use crate::directive::{ParsedAction, find_loose_action, parse_reply};
use crate::dispatch::{DispatchContext, Observation, ToolDispatcher, introspection_definition};
use crate::frontend::FrontendBridge;
use crate::prompt::{PromptCache, PromptPair, PromptSettings};
use crate::session::SessionStore;
use crate::stream_event::{ContentType, TurnEvent};
use crate::turn::{FinishReason, InputMessage, TurnOutcome, TurnRequest};

/// Message kind tag on the environment note.
pub const ENVIRONMENT_KIND: &str = "environment";
/// Message kind tag on runtime hints injected into the dialogue.
pub const HINT_KIND: &str = "hint";
/// Message kind tag on the outcome of a turn that asks the user.
pub const ASK_KIND: &str = "ask";

/// The core loop that drives the model through reason → act → observe.
pub struct AgentLoop {
    /// The LLM provider to use
    provider: Arc<dyn Provider>,

    /// Default model (a turn may override it)
    model: String,

    temperature: f32,

    /// Default max tokens per response
    max_tokens: Option<u32>,

    sessions: Arc<SessionStore>,

    dispatcher: ToolDispatcher,

    prompts: PromptCache,

    prompt_settings: PromptSettings,

    /// Summarizes long sessions at the start of a turn
    compressor: Option<Compressor>,

    event_bus: Arc<EventBus>,

    /// Maximum model calls per turn
    max_steps: usize,

    /// Consecutive failures of the same tool before a recovery hint
    failure_hint_threshold: u32,

    /// Use the detailed prompt while the session is shorter than this
    detailed_prompt_below: usize,

    /// Drop ACTION chunks from streamed output
    hide_action: bool,
}

/// How a turn ended.
#[derive(Debug)]
enum TurnEnd {
    Answer(String),
    Ask(String),
    /// The model returned nothing usable; its message is the response
    Terminal(Message),
    Aborted,
    Exhausted,
}

enum StepOutcome {
    Continue,
    Finished(TurnEnd),
}

/// Consecutive-failure tracking for the recovery hint.
#[derive(Debug, Default)]
pub(crate) struct RecoveryState {
    last_failed: Option<String>,
    failures: u32,
}

impl RecoveryState {
    /// Record a call outcome; true when the recovery hint is due.
    pub(crate) fn record(&mut self, tool: &str, success: bool, threshold: u32) -> bool {
        if success {
            self.last_failed = None;
            self.failures = 0;
            return false;
        }
        let key = tool.trim().to_lowercase();
        if self.last_failed.as_deref() == Some(key.as_str()) {
            self.failures += 1;
        } else {
            self.last_failed = Some(key);
            self.failures = 1;
        }
        self.failures >= threshold
    }
}

struct TurnState<'a> {
    session_id: String,
    messages: Vec<Message>,
    model: String,
    frontend: Vec<ToolDefinition>,
    tool_specs: Vec<ToolDefinition>,
    known_names: Vec<String>,
    prompts: Arc<PromptPair>,
    recovery: RecoveryState,
    classifier: StreamClassifier,
    events: Option<&'a mpsc::Sender<TurnEvent>>,
}

impl AgentLoop {
    /// Create a new agent loop with default settings.
    pub fn new(
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        registry: Arc<ToolRegistry>,
        sessions: Arc<SessionStore>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: 0.7,
            max_tokens: None,
            sessions,
            dispatcher: ToolDispatcher::new(registry).with_event_bus(event_bus.clone()),
            prompts: PromptCache::new(),
            prompt_settings: PromptSettings::default(),
            compressor: None,
            event_bus,
            max_steps: 10,
            failure_hint_threshold: 2,
            detailed_prompt_below: 6,
            hide_action: false,
        }
    }

    /// Build a loop wired from configuration: frontend timeout, compression,
    /// language, and step limits.
    pub fn from_config(
        provider: Arc<dyn Provider>,
        registry: Arc<ToolRegistry>,
        sessions: Arc<SessionStore>,
        event_bus: Arc<EventBus>,
        config: &AppConfig,
    ) -> Self {
        let bridge = FrontendBridge::new(config.frontend.timeout()).with_event_bus(event_bus.clone());
        let mut agent = Self::new(
            provider.clone(),
            config.default_model.clone(),
            registry,
            sessions,
            event_bus.clone(),
        )
        .with_temperature(config.default_temperature)
        .with_max_tokens(config.default_max_tokens)
        .with_max_steps(config.agent.max_steps)
        .with_failure_hint_threshold(config.agent.failure_hint_threshold)
        .with_detailed_prompt_below(config.agent.detailed_prompt_below)
        .with_language(config.agent.language)
        .with_hide_action(config.stream.hide_action)
        .with_frontend_bridge(Arc::new(bridge));

        if let Some(prompt) = &config.agent.system_prompt {
            agent = agent.with_system_prompt(prompt.clone());
        }
        if config.session.compression_enabled {
            agent = agent.with_compressor(
                Compressor::from_config(provider, config.default_model.clone(), &config.session)
                    .with_event_bus(event_bus),
            );
        }
        agent
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the default max tokens per LLM response.
    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    /// Set the maximum number of model calls per turn.
    pub fn with_max_steps(mut self, max: usize) -> Self {
        self.max_steps = max.max(1);
        self
    }

    pub fn with_failure_hint_threshold(mut self, threshold: u32) -> Self {
        self.failure_hint_threshold = threshold.max(1);
        self
    }

    pub fn with_detailed_prompt_below(mut self, messages: usize) -> Self {
        self.detailed_prompt_below = messages;
        self
    }

    pub fn with_language(mut self, language: Language) -> Self {
        self.prompt_settings.language = language;
        self.dispatcher = self.dispatcher.with_language(language);
        self
    }

    /// Custom instructions placed ahead of the generated prompt.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt_settings.custom_prompt = Some(prompt.into());
        self
    }

    pub fn with_hide_action(mut self, hide: bool) -> Self {
        self.hide_action = hide;
        self
    }

    /// Replace the backend executor (the registry by default).
    pub fn with_invoker(mut self, invoker: Arc<dyn ToolInvoker>) -> Self {
        self.dispatcher = self.dispatcher.with_invoker(invoker);
        self
    }

    pub fn with_frontend_bridge(mut self, bridge: Arc<FrontendBridge>) -> Self {
        self.dispatcher = self.dispatcher.with_bridge(bridge);
        self
    }

    pub fn with_compressor(mut self, compressor: Compressor) -> Self {
        self.compressor = Some(compressor);
        self
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn frontend_bridge(&self) -> &Arc<FrontendBridge> {
        self.dispatcher.bridge()
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        self.dispatcher.registry()
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Run one turn to completion.
    pub async fn run(
        &self,
        request: TurnRequest,
        cancel: CancellationToken,
    ) -> Result<TurnOutcome, Error> {
        self.execute(request, cancel, None).await
    }

    /// Run one turn, streaming typed chunks into `events`.
    ///
    /// The stream always ends with `Done` on success or `Error` on failure.
    pub async fn run_with_events(
        &self,
        request: TurnRequest,
        cancel: CancellationToken,
        events: &mpsc::Sender<TurnEvent>,
    ) -> Result<TurnOutcome, Error> {
        let result = self.execute(request, cancel, Some(events)).await;
        let last = match &result {
            Ok(outcome) => TurnEvent::Done {
                session_id: outcome.session_id.clone(),
                finish_reason: outcome.finish_reason,
                steps: outcome.steps,
            },
            Err(e) => TurnEvent::Error {
                message: e.to_string(),
            },
        };
        let _ = events.send(last).await;
        result
    }

    /// Spawn a streaming turn and return its event receiver.
    pub fn run_stream(
        self: &Arc<Self>,
        request: TurnRequest,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<TurnEvent> {
        let (tx, rx) = mpsc::channel(128);
        let agent = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = agent.run_with_events(request, cancel, &tx).await {
                warn!("Streaming turn failed: {e}");
            }
        });
        rx
    }

    async fn execute(
        &self,
        request: TurnRequest,
        cancel: CancellationToken,
        events: Option<&mpsc::Sender<TurnEvent>>,
    ) -> Result<TurnOutcome, Error> {
        let session_id = SessionId::from_optional(request.session_id.as_deref()).0;
        info!(
            session_id = %session_id,
            streaming = events.is_some(),
            frontend_tools = request.frontend_tools.len(),
            "Starting turn"
        );

        let mut messages = self.sessions.get_or_create(&session_id);
        absorb_input(&mut messages, request.messages, &request.environment);

        if let Some(compressor) = &self.compressor {
            compressor.compress_if_needed(&session_id, &mut messages).await;
        }

        let backend = self.dispatcher.registry().definitions();
        let prompts = self
            .prompts
            .get_or_build(&backend, &request.frontend_tools, &self.prompt_settings)
            .await;
        let known_names = self.dispatcher.known_names(&request.frontend_tools);
        let mut tool_specs = backend;
        tool_specs.extend(request.frontend_tools.iter().cloned());
        tool_specs.push(introspection_definition());

        let mut state = TurnState {
            session_id,
            messages,
            model: request.model.unwrap_or_else(|| self.model.clone()),
            frontend: request.frontend_tools,
            tool_specs,
            known_names,
            prompts,
            recovery: RecoveryState::default(),
            classifier: StreamClassifier::new(self.hide_action),
            events,
        };

        let mut steps = 0usize;
        let end = loop {
            if steps >= self.max_steps {
                warn!(session_id = %state.session_id, steps, "Step budget exhausted");
                break TurnEnd::Exhausted;
            }
            if cancel.is_cancelled() {
                info!(session_id = %state.session_id, steps, "Turn aborted");
                break TurnEnd::Aborted;
            }
            steps += 1;

            match self.step(&mut state, steps).await {
                Ok(StepOutcome::Continue) => {}
                Ok(StepOutcome::Finished(end)) => break end,
                Err(e) => {
                    warn!(session_id = %state.session_id, step = steps, "Model call failed: {e}");
                    self.persist(&state.session_id, state.messages);
                    return Err(e);
                }
            }
        };

        Ok(self.finish(state, end, steps))
    }

    async fn step(&self, state: &mut TurnState<'_>, step: usize) -> Result<StepOutcome, Error> {
        let language = self.prompt_settings.language;
        let system_prompt = if state.messages.len() < self.detailed_prompt_below {
            &state.prompts.detailed
        } else {
            &state.prompts.simple
        };

        let mut messages = Vec::with_capacity(state.messages.len() + 2);
        messages.push(Message::system(system_prompt.as_str()));
        messages.extend(state.messages.iter().cloned());
        messages.push(Message::system(hints::progress(language, step, self.max_steps)));

        let request = ProviderRequest {
            model: state.model.clone(),
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            tools: state.tool_specs.clone(),
            stream: state.events.is_some(),
            stop: vec![],
        };

        debug!(session_id = %state.session_id, step, messages = request.messages.len(), "Calling model");
        let response = self.call_model(request, state).await?;

        self.event_bus.publish(DomainEvent::ResponseGenerated {
            session_id: state.session_id.clone(),
            model: response.model.clone(),
            step,
            tokens_used: response.usage.as_ref().map(|u| u.total_tokens),
            timestamp: chrono::Utc::now(),
        });

        let assistant = response.message;
        if assistant.is_blank() {
            debug!(session_id = %state.session_id, step, "Empty model response ends the turn");
            return Ok(StepOutcome::Finished(TurnEnd::Terminal(assistant)));
        }
        state.messages.push(assistant.clone());

        // ── Structured calls ──
        if assistant.has_tool_calls() {
            let mut any_failed = false;
            let mut hint_due = false;
            for tc in &assistant.tool_calls {
                let call = ToolCallRequest::from(tc);
                let obs = self.execute_call(state, &call, step).await;
                any_failed |= !obs.success;
                hint_due |= state
                    .recovery
                    .record(&call.name, obs.success, self.failure_hint_threshold);
                state.messages.push(Message::observation(Some(call.id), obs.text));
            }
            if any_failed && hint_due {
                self.push_recovery_hint(state);
            }
            return Ok(StepOutcome::Continue);
        }

        // ── Directive text ──
        let reply = parse_reply(&assistant.content);
        if let Some(question) = reply.ask {
            return Ok(StepOutcome::Finished(TurnEnd::Ask(question)));
        }
        if let Some(answer) = reply.answer {
            return Ok(StepOutcome::Finished(TurnEnd::Answer(answer)));
        }

        let has_thought = reply.thought.is_some();
        let action: ParsedAction = match (has_thought, reply.action) {
            (_, Some(action)) => action,
            (true, None) if !reply.malformed_action => {
                push_hint(state, hints::continue_with_action(language));
                return Ok(StepOutcome::Continue);
            }
            _ => match find_loose_action(&assistant.content, &state.known_names) {
                Some(action) => {
                    debug!(session_id = %state.session_id, tool = %action.name, "Recovered loose action");
                    action
                }
                None => {
                    push_hint(state, hints::format_correction(language));
                    return Ok(StepOutcome::Continue);
                }
            },
        };

        if !has_thought {
            let thought = hints::default_thought(language, &action.name);
            debug!(session_id = %state.session_id, step, thought = %thought, "Action without a thought");
            if let Some(events) = state.events {
                let _ = events
                    .send(TurnEvent::chunk(ContentType::Thinking, thought))
                    .await;
            }
        }

        let call = ToolCallRequest::from_directive(action.name, action.args);
        let obs = self.execute_call(state, &call, step).await;
        let success = obs.success;
        state.messages.push(Message::observation(None, obs.text));
        if state
            .recovery
            .record(&call.name, success, self.failure_hint_threshold)
        {
            self.push_recovery_hint(state);
        }
        Ok(StepOutcome::Continue)
    }

    async fn call_model(
        &self,
        request: ProviderRequest,
        state: &mut TurnState<'_>,
    ) -> Result<ProviderResponse, Error> {
        let Some(events) = state.events else {
            return Ok(self.provider.complete(request).await?);
        };

        let model = request.model.clone();
        let mut stream = self.provider.stream(request).await?;
        let mut content = String::new();
        let mut tool_calls: Vec<MessageToolCall> = Vec::new();
        let mut usage = None;

        while let Some(chunk) = stream.recv().await {
            let chunk = chunk?;
            if let Some(text) = chunk.content.as_deref()
                && !text.is_empty()
            {
                content.push_str(text);
                for typed in state.classifier.feed(text) {
                    let _ = events.send(typed.into()).await;
                }
            }

            for tc in chunk.tool_calls {
                if let Some(existing) = tool_calls.iter_mut().find(|t| t.id == tc.id) {
                    existing.arguments.push_str(&tc.arguments);
                } else {
                    tool_calls.push(tc);
                }
            }

            if chunk.usage.is_some() {
                usage = chunk.usage;
            }
            if chunk.done {
                break;
            }
        }
        for typed in state.classifier.finish() {
            let _ = events.send(typed.into()).await;
        }

        let mut message = Message::assistant_calls(tool_calls);
        message.content = content;
        Ok(ProviderResponse {
            message,
            usage,
            model,
        })
    }

    async fn execute_call(
        &self,
        state: &TurnState<'_>,
        call: &ToolCallRequest,
        step: usize,
    ) -> Observation {
        if let Some(events) = state.events {
            let label = format!("{}({})", call.name, call.arguments.to_value());
            let _ = events
                .send(TurnEvent::chunk(ContentType::ActionStart, label))
                .await;
        }

        let ctx = DispatchContext {
            session_id: &state.session_id,
            step,
            events: state.events,
        };
        let obs = self.dispatcher.dispatch(call, &state.frontend, &ctx).await;

        if let Some(events) = state.events {
            let _ = events
                .send(TurnEvent::chunk(ContentType::Observation, obs.text.clone()))
                .await;
            let _ = events
                .send(TurnEvent::chunk(ContentType::ActionEnd, call.name.clone()))
                .await;
        }
        obs
    }

    fn push_recovery_hint(&self, state: &mut TurnState<'_>) {
        let Some(tool) = state.recovery.last_failed.clone() else {
            return;
        };
        info!(
            session_id = %state.session_id,
            tool = %tool,
            failures = state.recovery.failures,
            "Injecting recovery hint"
        );
        let text = hints::recovery(self.prompt_settings.language, &tool, state.recovery.failures);
        push_hint(state, text);
    }

    fn finish(&self, state: TurnState<'_>, end: TurnEnd, steps: usize) -> TurnOutcome {
        let language = self.prompt_settings.language;
        let (message, finish_reason) = match end {
            TurnEnd::Answer(text) => (Message::assistant(text), FinishReason::Stop),
            TurnEnd::Ask(question) => (
                Message::assistant(question).with_kind(ASK_KIND),
                FinishReason::Stop,
            ),
            TurnEnd::Terminal(message) => (message, FinishReason::Stop),
            TurnEnd::Aborted => (
                Message::assistant(hints::aborted(language)),
                FinishReason::Aborted,
            ),
            TurnEnd::Exhausted => (
                Message::assistant(hints::exhausted(language, self.max_steps)),
                FinishReason::Length,
            ),
        };

        info!(
            session_id = %state.session_id,
            steps,
            finish_reason = %finish_reason,
            messages = state.messages.len(),
            "Turn finished"
        );
        let session_id = state.session_id;
        self.persist(&session_id, state.messages);

        TurnOutcome {
            session_id,
            message,
            finish_reason,
            steps,
        }
    }
}

impl AgentLoop {
    /// Expire idle sessions and cancel their pending frontend calls.
    pub fn sweep_expired(&self) -> usize {
        let expired = self.sessions.sweep_expired_ids();
        for id in &expired {
            self.frontend_bridge().cleanup_session(id);
        }
        expired.len()
    }

    /// Run the session sweeper until `cancel` fires; expired sessions
    /// also lose their pending frontend calls.
    pub fn spawn_sweeper(&self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let bridge = self.frontend_bridge().clone();
        self.sessions.clone().spawn_sweeper(cancel, move |id| {
            bridge.cleanup_session(id);
        })
    }

    /// Write the turn's history back unless the session was torn down
    /// while the turn ran.
    fn persist(&self, session_id: &str, messages: Vec<Message>) {
        if !self.sessions.save_existing(session_id, messages) {
            info!(session_id, "Session cleared during the turn; history discarded");
        }
    }
}

fn push_hint(state: &mut TurnState<'_>, text: String) {
    state.messages.push(Message::user(text).with_kind(HINT_KIND));
}

/// Merge the caller's messages into the session.
///
/// A new session takes every supplied message; an existing one only
/// appends the newest user message. Environment lines replace any
/// earlier environment note.
fn absorb_input(messages: &mut Vec<Message>, input: Vec<InputMessage>, environment: &[String]) {
    let incoming: Vec<Message> = input
        .into_iter()
        .filter(|m| !m.content.trim().is_empty())
        .map(InputMessage::into_message)
        .collect();

    if messages.is_empty() {
        messages.extend(incoming);
    } else if let Some(newest) = incoming.into_iter().rev().find(|m| m.role == Role::User) {
        messages.push(newest);
    }

    let lines: Vec<&str> = environment
        .iter()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .collect();
    if lines.is_empty() {
        return;
    }
    messages.retain(|m| m.kind() != Some(ENVIRONMENT_KIND));
    let note = Message::system(format!(
        "Environment (authoritative, overrides anything earlier):\n{}",
        lines.join("\n")
    ))
    .with_kind(ENVIRONMENT_KIND);
    let at = messages
        .iter()
        .rposition(|m| m.role == Role::User)
        .unwrap_or(messages.len());
    messages.insert(at, note);
}

mod hints {
    use agentrelay_config::Language;

    pub fn progress(language: Language, step: usize, max: usize) -> String {
        let remaining = max.saturating_sub(step);
        match language {
            Language::English => format!(
                "[Step {step}/{max}] {remaining} step(s) left after this one. \
                 Reply with THINK + ACTION, or ANSWER when you are done."
            ),
            Language::Chinese => format!(
                "[第 {step}/{max} 步] 本步之后还剩 {remaining} 步。请用 THINK + ACTION 回复，完成时用 ANSWER。"
            ),
        }
    }

    pub fn continue_with_action(language: Language) -> String {
        match language {
            Language::English => "You wrote a THINK section but no ACTION. Continue with exactly one \
                line `ACTION: tool_name(arg1, ...)`, or reply `ANSWER: ...` if you are done."
                .into(),
            Language::Chinese => "你只写了 THINK，没有 ACTION。请继续写一行 `ACTION: tool_name(arg1, ...)`，\
                如果已经完成请回复 `ANSWER: ...`。"
                .into(),
        }
    }

    pub fn default_thought(language: Language, tool: &str) -> String {
        match language {
            Language::English => format!("Calling `{tool}`."),
            Language::Chinese => format!("调用 `{tool}`。"),
        }
    }

    pub fn format_correction(language: Language) -> String {
        match language {
            Language::English => "Your reply did not follow the required format. Use `THINK: ...` \
                followed by `ACTION: tool_name(arg1, ...)`, `ANSWER: ...` for the final answer, \
                or `ASK: ...` to ask the user."
                .into(),
            Language::Chinese => "你的回复不符合要求的格式。请使用 `THINK: ...` 加 \
                `ACTION: tool_name(arg1, ...)`，最终答案用 `ANSWER: ...`，需要询问用户时用 `ASK: ...`。"
                .into(),
        }
    }

    pub fn recovery(language: Language, tool: &str, failures: u32) -> String {
        match language {
            Language::English => format!(
                "The tool `{tool}` has failed {failures} times in a row. Call \
                 `tool_info(\"{tool}\")` to check its parameters, simplify the arguments, \
                 or try a different approach."
            ),
            Language::Chinese => format!(
                "工具 `{tool}` 已连续失败 {failures} 次。请调用 `tool_info(\"{tool}\")` 查看参数，\
                 简化参数，或换一种方法。"
            ),
        }
    }

    pub fn exhausted(language: Language, max: usize) -> String {
        match language {
            Language::English => format!(
                "I could not finish this within {max} steps. Try splitting the request into \
                 smaller parts or giving more specific instructions."
            ),
            Language::Chinese => format!(
                "未能在 {max} 步内完成。请尝试把请求拆成更小的部分，或给出更具体的说明。"
            ),
        }
    }

    pub fn aborted(language: Language) -> String {
        match language {
            Language::English => "The request was cancelled.".into(),
            Language::Chinese => "请求已取消。".into(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────
