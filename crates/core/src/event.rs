//! Domain event system: decoupled observation of the runtime.
//!
//! Events are published when something interesting happens in a turn or in
//! the session store. Observers subscribe without the publisher knowing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    /// The model answered one loop step
    ResponseGenerated {
        session_id: String,
        model: String,
        step: usize,
        tokens_used: Option<u32>,
        timestamp: DateTime<Utc>,
    },

    /// A tool call was dispatched and produced an observation
    ToolExecuted {
        session_id: String,
        tool_name: String,
        route: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A session's older span was replaced by a summary
    SessionCompressed {
        session_id: String,
        removed_messages: usize,
        timestamp: DateTime<Utc>,
    },

    /// The expiry sweep removed idle sessions
    SessionsExpired {
        count: usize,
        timestamp: DateTime<Utc>,
    },

    /// A frontend tool call was not resolved in time
    FrontendCallTimedOut {
        session_id: String,
        call_id: String,
        tool_name: String,
        timestamp: DateTime<Utc>,
    },
}

impl DomainEvent {
    /// Short event name (used as the SSE event type).
    pub fn name(&self) -> &'static str {
        match self {
            Self::ResponseGenerated { .. } => "response_generated",
            Self::ToolExecuted { .. } => "tool_executed",
            Self::SessionCompressed { .. } => "session_compressed",
            Self::SessionsExpired { .. } => "sessions_expired",
            Self::FrontendCallTimedOut { .. } => "frontend_call_timed_out",
        }
    }
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        let name = event.name();
        // No subscribers is fine
        if self.sender.send(Arc::new(event)).is_err() {
            tracing::trace!(event = name, "No event subscribers");
        }
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn event_bus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(DomainEvent::ToolExecuted {
            session_id: "s1".into(),
            tool_name: "add".into(),
            route: "backend".into(),
            success: true,
            duration_ms: 42,
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            DomainEvent::ToolExecuted { tool_name, success, .. } => {
                assert_eq!(tool_name, "add");
                assert!(success);
            }
            _ => panic!("Expected ToolExecuted event"),
        }
        assert_eq!(event.name(), "tool_executed");
    }

    #[test]
    fn event_bus_no_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        bus.publish(DomainEvent::SessionsExpired {
            count: 0,
            timestamp: Utc::now(),
        });
    }

    #[test]
    fn event_serializes_with_type_tag() {
        let event = DomainEvent::SessionCompressed {
            session_id: "s".into(),
            removed_messages: 4,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"session_compressed""#));
    }
}
