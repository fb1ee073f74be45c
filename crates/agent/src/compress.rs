//! Session compression.
//!
//! When a session's dialogue grows past the token threshold, the older
//! span is summarized by one auxiliary model call and replaced with a
//! single synthetic summary message. System messages and the recent tail
//! are kept verbatim.

use agentrelay_config::SessionConfig;
use agentrelay_core::event::{DomainEvent, EventBus};
use agentrelay_core::message::{Message, Role};
use agentrelay_core::provider::{Provider, ProviderRequest};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::token::{estimate_dialogue_tokens, estimate_message_tokens};

/// Message kind tag on the synthetic summary.
pub const SUMMARY_KIND: &str = "summary";

const SUMMARY_INSTRUCTION: &str = "You compress chat transcripts. Summarize the conversation \
below so an assistant can continue it without the original messages. Keep user goals, \
decisions, facts learned from tools, names, numbers, and open questions. Drop pleasantries \
and failed attempts that taught nothing. Reply with the summary only.";

// The older span must outweigh the recent budget by this factor to be worth a model call.
const MIN_OLDER_RATIO: f64 = 1.2;

/// Summarizes the older span of long sessions.
pub struct Compressor {
    provider: Arc<dyn Provider>,
    model: String,
    threshold_tokens: usize,
    keep_recent_tokens: usize,
    summary_max_tokens: u32,
    event_bus: Option<Arc<EventBus>>,
}

impl Compressor {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self::from_config(provider, model, &SessionConfig::default())
    }

    pub fn from_config(
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        config: &SessionConfig,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            threshold_tokens: config.compression_threshold_tokens,
            keep_recent_tokens: config.keep_recent_tokens,
            summary_max_tokens: config.summary_max_tokens,
            event_bus: None,
        }
    }

    pub fn with_thresholds(mut self, threshold_tokens: usize, keep_recent_tokens: usize) -> Self {
        self.threshold_tokens = threshold_tokens;
        self.keep_recent_tokens = keep_recent_tokens;
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Compress `messages` in place if they are over budget.
    ///
    /// Returns whether a rewrite happened. Summarization failures leave
    /// the messages untouched.
    pub async fn compress_if_needed(&self, session_id: &str, messages: &mut Vec<Message>) -> bool {
        let total = estimate_dialogue_tokens(messages);
        if total < self.threshold_tokens {
            return false;
        }

        let (system, dialogue): (Vec<Message>, Vec<Message>) =
            messages.iter().cloned().partition(|m| m.role == Role::System);

        let split = self.recent_split(&dialogue);
        let (older, recent) = dialogue.split_at(split);
        let older_tokens: usize = older.iter().map(estimate_message_tokens).sum();

        if older.is_empty() || older_tokens as f64 <= self.keep_recent_tokens as f64 * MIN_OLDER_RATIO {
            debug!(session_id, total, older_tokens, "Older span too small to compress");
            return false;
        }

        let summary = match self.summarize(older).await {
            Ok(summary) => summary,
            Err(reason) => {
                warn!(session_id, "Session compression skipped: {reason}");
                return false;
            }
        };

        let removed = older.len();
        let mut rewritten = system;
        rewritten.push(
            Message::assistant(format!("[Summary of the earlier conversation]\n{summary}"))
                .with_kind(SUMMARY_KIND),
        );
        rewritten.extend_from_slice(recent);
        *messages = rewritten;

        info!(session_id, removed, older_tokens, "Compressed session");
        if let Some(bus) = &self.event_bus {
            bus.publish(DomainEvent::SessionCompressed {
                session_id: session_id.to_string(),
                removed_messages: removed,
                timestamp: chrono::Utc::now(),
            });
        }
        true
    }

    /// Index where the recent tail begins: scan newest to oldest until the
    /// keep-recent budget would be exceeded.
    fn recent_split(&self, dialogue: &[Message]) -> usize {
        let mut kept = 0usize;
        let mut split = dialogue.len();
        for (i, msg) in dialogue.iter().enumerate().rev() {
            let tokens = estimate_message_tokens(msg);
            if kept + tokens > self.keep_recent_tokens {
                break;
            }
            kept += tokens;
            split = i;
        }
        // A tail must not open with a tool result whose call was summarized away
        while split < dialogue.len() && dialogue[split].tool_call_id.is_some() {
            split += 1;
        }
        split
    }

    async fn summarize(&self, older: &[Message]) -> Result<String, String> {
        let transcript = older
            .iter()
            .map(render_for_summary)
            .collect::<Vec<_>>()
            .join("\n");

        let request = ProviderRequest {
            model: self.model.clone(),
            messages: vec![Message::system(SUMMARY_INSTRUCTION), Message::user(transcript)],
            temperature: 0.3,
            max_tokens: Some(self.summary_max_tokens),
            tools: vec![],
            stream: false,
            stop: vec![],
        };

        let response = self
            .provider
            .complete(request)
            .await
            .map_err(|e| e.to_string())?;
        let summary = response.message.content.trim().to_string();
        if summary.is_empty() {
            return Err("summarizer returned an empty reply".into());
        }
        Ok(summary)
    }
}

fn render_for_summary(msg: &Message) -> String {
    let role = match (msg.role, msg.kind()) {
        (_, Some("observation")) => "observation",
        (Role::User, _) => "user",
        (Role::Assistant, _) => "assistant",
        (Role::System, _) => "system",
    };
    let mut line = format!("{role}: {}", msg.content);
    for tc in &msg.tool_calls {
        line.push_str(&format!("\n{role}: called {}({})", tc.name, tc.arguments));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;
    use agentrelay_core::message::MessageToolCall;

    fn long_dialogue(turns: usize) -> Vec<Message> {
        let mut messages = vec![Message::system("You are helpful.")];
        for i in 0..turns {
            // 40 letters -> 10 tokens each
            messages.push(Message::user(format!("question {i} {}", "q".repeat(30))));
            messages.push(Message::assistant(format!("answer {i} {}", "a".repeat(32))));
        }
        messages
    }

    fn compressor(provider: Arc<SequentialMockProvider>) -> Compressor {
        Compressor::new(provider, "mock-model").with_thresholds(100, 40)
    }

    #[tokio::test]
    async fn below_threshold_is_untouched() {
        let provider = Arc::new(SequentialMockProvider::new(vec![]));
        let mut messages = long_dialogue(2);
        let before = messages.clone();
        assert!(!compressor(provider.clone()).compress_if_needed("s", &mut messages).await);
        assert_eq!(messages, before);
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn rewrites_to_system_summary_and_tail() {
        let provider = Arc::new(SequentialMockProvider::single_text("User asked many questions."));
        let bus = Arc::new(EventBus::new(8));
        let mut rx = bus.subscribe();
        let compressor = compressor(provider.clone()).with_event_bus(bus);

        let mut messages = long_dialogue(10);
        let original = messages.clone();
        assert!(compressor.compress_if_needed("s", &mut messages).await);

        assert_eq!(messages[0], original[0]);
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].kind(), Some(SUMMARY_KIND));
        assert!(messages[1].content.contains("User asked many questions."));

        let summaries = messages.iter().filter(|m| m.kind() == Some(SUMMARY_KIND)).count();
        assert_eq!(summaries, 1);

        // The tail is the newest messages, unchanged and in order
        let tail = &messages[2..];
        assert!(!tail.is_empty());
        assert_eq!(tail, &original[original.len() - tail.len()..]);
        assert!(!messages.iter().any(|m| m.content.starts_with("question 0 ")));

        let request = &provider.requests()[0];
        assert!((request.temperature - 0.3).abs() < f32::EPSILON);
        assert_eq!(request.max_tokens, Some(800));

        let event = rx.recv().await.unwrap();
        assert!(matches!(event.as_ref(), DomainEvent::SessionCompressed { .. }));
    }

    #[tokio::test]
    async fn summarizer_failure_is_swallowed() {
        let provider = Arc::new(SequentialMockProvider::failing());
        let mut messages = long_dialogue(10);
        let before = messages.clone();
        assert!(!compressor(provider).compress_if_needed("s", &mut messages).await);
        assert_eq!(messages, before);
    }

    #[tokio::test]
    async fn small_older_span_is_skipped() {
        let provider = Arc::new(SequentialMockProvider::new(vec![]));
        // threshold met, but the older span is not larger than 1.2x keep-recent
        let compressor = Compressor::new(provider.clone(), "m").with_thresholds(60, 40);
        let mut messages = long_dialogue(4);
        assert!(!compressor.compress_if_needed("s", &mut messages).await);
        assert_eq!(provider.call_count(), 0);
    }

    #[test]
    fn tail_never_starts_with_orphan_tool_result() {
        let provider = Arc::new(SequentialMockProvider::new(vec![]));
        let compressor = Compressor::new(provider, "m").with_thresholds(100, 4);
        let dialogue = vec![
            Message::user("a".repeat(40)),
            Message::assistant_calls(vec![MessageToolCall {
                id: "c1".into(),
                name: "add".into(),
                arguments: "{}".into(),
            }]),
            Message::observation(Some("c1".into()), "abcd".repeat(2)),
            Message::assistant("abcd".repeat(2)),
        ];
        let split = compressor.recent_split(&dialogue);
        assert_eq!(split, 3);
    }
}
