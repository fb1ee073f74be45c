//! In-memory session store with idle expiry.
//!
//! Sessions are keyed by id in a concurrent map. Every read or write
//! refreshes the session's last-access time; a periodic sweep removes
//! sessions idle longer than the configured threshold.

use agentrelay_config::SessionConfig;
use agentrelay_core::event::{DomainEvent, EventBus};
use agentrelay_core::message::Message;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone)]
struct SessionEntry {
    messages: Vec<Message>,
    last_access: Instant,
}

impl SessionEntry {
    fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            last_access: Instant::now(),
        }
    }
}

/// Shared store of per-session message histories.
pub struct SessionStore {
    sessions: DashMap<String, SessionEntry>,
    idle_timeout: Duration,
    sweep_interval: Duration,
    event_bus: Option<Arc<EventBus>>,
}

impl SessionStore {
    pub fn new(idle_timeout: Duration, sweep_interval: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            idle_timeout,
            sweep_interval,
            event_bus: None,
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.idle_timeout(), config.sweep_interval())
    }

    /// Publish `SessionsExpired` events on this bus.
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// The session's messages, creating an empty session if needed.
    pub fn get_or_create(&self, session_id: &str) -> Vec<Message> {
        let mut entry = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                debug!(session_id, "Creating session");
                SessionEntry::new(Vec::new())
            });
        entry.last_access = Instant::now();
        entry.messages.clone()
    }

    /// Replace the session's messages.
    pub fn save(&self, session_id: &str, messages: Vec<Message>) {
        self.sessions
            .insert(session_id.to_string(), SessionEntry::new(messages));
    }

    /// Replace the messages of a session that still exists.
    ///
    /// Returns false, writing nothing, when the session was cleared or
    /// expired in the meantime.
    pub fn save_existing(&self, session_id: &str, messages: Vec<Message>) -> bool {
        match self.sessions.get_mut(session_id) {
            Some(mut entry) => {
                entry.messages = messages;
                entry.last_access = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Remove one session. Returns whether it existed.
    pub fn clear(&self, session_id: &str) -> bool {
        self.sessions.remove(session_id).is_some()
    }

    /// Remove every session. Returns how many were removed.
    pub fn clear_all(&self) -> usize {
        let count = self.sessions.len();
        self.sessions.clear();
        count
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Whether a session exists (does not refresh its access time).
    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    /// Remove sessions idle longer than the threshold.
    ///
    /// Each entry's own last-access time is checked under its shard lock,
    /// so a session touched during the scan survives.
    pub fn sweep_expired(&self) -> usize {
        self.sweep_expired_ids().len()
    }

    /// Like [`sweep_expired`](Self::sweep_expired), returning the removed ids.
    pub fn sweep_expired_ids(&self) -> Vec<String> {
        let idle_timeout = self.idle_timeout;
        let mut removed = Vec::new();
        self.sessions.retain(|id, entry| {
            let keep = entry.last_access.elapsed() <= idle_timeout;
            if !keep {
                removed.push(id.clone());
            }
            keep
        });

        if !removed.is_empty() {
            info!(removed = removed.len(), remaining = self.sessions.len(), "Expired idle sessions");
            if let Some(bus) = &self.event_bus {
                bus.publish(DomainEvent::SessionsExpired {
                    count: removed.len(),
                    timestamp: chrono::Utc::now(),
                });
            }
        }
        removed
    }

    /// Sweep every sweep interval until `cancel` fires, handing each
    /// expired id to `on_expired`.
    pub fn spawn_sweeper<F>(self: Arc<Self>, cancel: CancellationToken, on_expired: F) -> JoinHandle<()>
    where
        F: Fn(&str) + Send + 'static,
    {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.sweep_interval);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Session sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        for id in self.sweep_expired_ids() {
                            on_expired(&id);
                        }
                    }
                }
            }
        })
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::from_config(&SessionConfig::default())
    }
}
