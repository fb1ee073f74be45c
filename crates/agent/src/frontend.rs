//! Frontend tool bridge.
//!
//! Some tools run inside the remote client. The loop registers a pending
//! call, the client is notified over the turn's stream, and the result
//! comes back out-of-band through [`FrontendBridge::resolve`]. Each pending
//! call has a single-resolution oneshot slot and its own timeout.

use agentrelay_core::event::{DomainEvent, EventBus};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub const DEFAULT_FRONTEND_TIMEOUT: Duration = Duration::from_secs(30);

/// What the client sent back.
#[derive(Debug, Clone, PartialEq)]
pub struct FrontendResult {
    pub value: serde_json::Value,
    pub is_error: bool,
}

/// How waiting on a pending call ended.
#[derive(Debug, Clone, PartialEq)]
pub enum FrontendReply {
    Resolved(FrontendResult),
    TimedOut(Duration),
    /// The session was torn down, or the id was never registered
    Cancelled,
}

struct PendingCall {
    session_id: String,
    tool_name: String,
    created_at: Instant,
    slot: oneshot::Sender<FrontendResult>,
}

/// Correlates frontend tool calls with their out-of-band results.
pub struct FrontendBridge {
    pending: DashMap<String, PendingCall>,
    waiters: DashMap<String, oneshot::Receiver<FrontendResult>>,
    timeout: Duration,
    event_bus: Option<Arc<EventBus>>,
}

impl Default for FrontendBridge {
    fn default() -> Self {
        Self::new(DEFAULT_FRONTEND_TIMEOUT)
    }
}

impl FrontendBridge {
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: DashMap::new(),
            waiters: DashMap::new(),
            timeout,
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Register a pending call and return its correlation id.
    pub fn register(&self, session_id: &str, tool_name: &str) -> String {
        let call_id = format!("fe_{}", uuid::Uuid::new_v4().simple());
        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            call_id.clone(),
            PendingCall {
                session_id: session_id.to_string(),
                tool_name: tool_name.to_string(),
                created_at: Instant::now(),
                slot: tx,
            },
        );
        self.waiters.insert(call_id.clone(), rx);
        debug!(session_id, call_id = %call_id, tool = tool_name, "Registered frontend call");
        call_id
    }

    /// Wait for the result of a registered call, up to the bridge timeout.
    pub async fn await_result(&self, session_id: &str, call_id: &str) -> FrontendReply {
        let Some((_, rx)) = self.waiters.remove(call_id) else {
            return FrontendReply::Cancelled;
        };

        let mut rx = rx;
        match tokio::time::timeout(self.timeout, &mut rx).await {
            Ok(Ok(result)) => FrontendReply::Resolved(result),
            Ok(Err(_)) => FrontendReply::Cancelled,
            Err(_) => {
                let Some((_, call)) = self.pending.remove(call_id) else {
                    // `resolve` claimed the call as the deadline passed; its
                    // value is already sent or the session was torn down
                    return match rx.await {
                        Ok(result) => FrontendReply::Resolved(result),
                        Err(_) => FrontendReply::Cancelled,
                    };
                };
                warn!(
                    session_id,
                    call_id,
                    timeout_secs = self.timeout.as_secs(),
                    "Frontend call timed out"
                );
                if let Some(bus) = &self.event_bus {
                    bus.publish(DomainEvent::FrontendCallTimedOut {
                        session_id: session_id.to_string(),
                        call_id: call_id.to_string(),
                        tool_name: call.tool_name,
                        timestamp: chrono::Utc::now(),
                    });
                }
                FrontendReply::TimedOut(self.timeout)
            }
        }
    }

    /// Deliver a result. Returns false for unknown, foreign, or
    /// already-resolved ids.
    pub fn resolve(
        &self,
        session_id: &str,
        call_id: &str,
        value: serde_json::Value,
        is_error: bool,
    ) -> bool {
        let Some((_, call)) = self
            .pending
            .remove_if(call_id, |_, call| call.session_id == session_id)
        else {
            debug!(session_id, call_id, "Ignoring stray frontend result");
            return false;
        };

        info!(
            session_id,
            call_id,
            tool = %call.tool_name,
            is_error,
            waited_ms = call.created_at.elapsed().as_millis() as u64,
            "Frontend call resolved"
        );
        call.slot.send(FrontendResult { value, is_error }).is_ok()
    }

    /// Drop every pending call of a session; waiters see `Cancelled`.
    pub fn cleanup_session(&self, session_id: &str) -> usize {
        let ids: Vec<String> = self
            .pending
            .iter()
            .filter(|entry| entry.session_id == session_id)
            .map(|entry| entry.key().clone())
            .collect();
        for id in &ids {
            self.pending.remove(id);
            self.waiters.remove(id);
        }
        if !ids.is_empty() {
            debug!(session_id, count = ids.len(), "Cancelled pending frontend calls");
        }
        ids.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn resolved_before_await_returns_value() {
        let bridge = FrontendBridge::default();
        let id = bridge.register("s1", "pick_color");
        assert!(bridge.resolve("s1", &id, json!("blue"), false));

        let reply = bridge.await_result("s1", &id).await;
        assert_eq!(
            reply,
            FrontendReply::Resolved(FrontendResult {
                value: json!("blue"),
                is_error: false
            })
        );
        assert_eq!(bridge.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn resolution_at_the_deadline_is_reported_once() {
        let bridge = Arc::new(FrontendBridge::new(Duration::from_secs(5)));
        let id = bridge.register("s1", "confirm");

        let resolver = bridge.clone();
        let rid = id.clone();
        let resolved = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            resolver.resolve("s1", &rid, json!("yes"), false)
        });

        let reply = bridge.await_result("s1", &id).await;
        if resolved.await.unwrap() {
            assert!(matches!(reply, FrontendReply::Resolved(_)), "got {reply:?}");
        } else {
            assert_eq!(reply, FrontendReply::TimedOut(Duration::from_secs(5)));
        }
        assert_eq!(bridge.pending_count(), 0);
    }

    #[tokio::test]
    async fn resolved_while_waiting() {
        let bridge = Arc::new(FrontendBridge::default());
        let id = bridge.register("s1", "confirm");

        let resolver = bridge.clone();
        let rid = id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            resolver.resolve("s1", &rid, json!("denied by user"), true);
        });

        match bridge.await_result("s1", &id).await {
            FrontendReply::Resolved(result) => {
                assert!(result.is_error);
                assert_eq!(result.value, json!("denied by user"));
            }
            other => panic!("Expected resolution, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unresolved_call_times_out() {
        let bus = Arc::new(EventBus::new(8));
        let mut rx = bus.subscribe();
        let bridge = FrontendBridge::new(Duration::from_secs(30)).with_event_bus(bus);
        let id = bridge.register("s1", "slow_tool");

        let start = Instant::now();
        let reply = bridge.await_result("s1", &id).await;
        assert_eq!(reply, FrontendReply::TimedOut(Duration::from_secs(30)));
        assert!(start.elapsed() >= Duration::from_secs(30));

        // Late result is a no-op
        assert!(!bridge.resolve("s1", &id, json!(1), false));

        let event = rx.recv().await.unwrap();
        assert!(matches!(event.as_ref(), DomainEvent::FrontendCallTimedOut { .. }));
    }

    #[test]
    fn stray_and_double_resolution_are_rejected() {
        let bridge = FrontendBridge::default();
        assert!(!bridge.resolve("s1", "fe_unknown", json!(null), false));

        let id = bridge.register("s1", "t");
        assert!(!bridge.resolve("other-session", &id, json!(1), false));
        assert!(bridge.resolve("s1", &id, json!(1), false));
        assert!(!bridge.resolve("s1", &id, json!(2), false));
    }

    #[tokio::test]
    async fn cleanup_cancels_waiters() {
        let bridge = Arc::new(FrontendBridge::default());
        let id = bridge.register("s1", "t");
        let other = bridge.register("s2", "t");

        let waiter = bridge.clone();
        let wid = id.clone();
        let handle = tokio::spawn(async move { waiter.await_result("s1", &wid).await });
        tokio::task::yield_now().await;

        assert_eq!(bridge.cleanup_session("s1"), 1);
        assert_eq!(handle.await.unwrap(), FrontendReply::Cancelled);
        assert_eq!(bridge.pending_count(), 1);
        assert!(bridge.resolve("s2", &other, json!("ok"), false));
    }
}
