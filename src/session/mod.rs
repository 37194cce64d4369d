//! Per-agent session registry: rate limiting and message delivery (§4.4).
//!
//! Session owns agent sockets/queues and does not persist them (§3
//! "Ownership") — everything here lives only as long as the process.
//! Grounded on `enterprise::collaboration::session::CollaborationSession`
//! for the single-lock registry shape (one `Mutex` guards both the
//! session map and every session's mutable fields, per §4.4
//! "Concurrency").

pub mod queue;
pub mod ratelimit;

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::error::{MascError, MascResult};
use crate::validation::validate_agent_id;

pub use queue::{MessageQueue, QueuedMessage, DEFAULT_MAX_QUEUE_DEPTH};
pub use ratelimit::{Category, RateLimitConfig, RateLimiter, Role};

/// How often `wait()` re-polls a session's queue (§4.4).
const WAIT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// One agent's live session state. All fields here are guarded by the
/// registry's single `Mutex` except the limiter's own burst atomics.
struct SessionState {
    limiter: RateLimiter,
    last_activity: DateTime<Utc>,
    is_listening: bool,
    queue: MessageQueue,
}

impl SessionState {
    fn new(role: Role, priority: bool, config: &RateLimitConfig) -> Self {
        Self {
            limiter: RateLimiter::new(role, priority, config),
            last_activity: Utc::now(),
            is_listening: false,
            queue: MessageQueue::new(DEFAULT_MAX_QUEUE_DEPTH),
        }
    }
}

struct Registry {
    sessions: HashMap<String, SessionState>,
}

/// The process-wide session registry: one per `ProcessContext`.
pub struct SessionRegistry {
    inner: Mutex<Registry>,
    config: RateLimitConfig,
}

impl SessionRegistry {
    /// An empty registry using the default rate-limit configuration.
    pub fn new() -> Self {
        Self::with_config(RateLimitConfig::default())
    }

    /// An empty registry with a custom burst-reserve configuration.
    pub fn with_config(config: RateLimitConfig) -> Self {
        Self {
            inner: Mutex::new(Registry {
                sessions: HashMap::new(),
            }),
            config,
        }
    }

    /// Register a session for `agent`. Re-joining resets its queue and
    /// rate-limit windows.
    pub fn join(&self, agent: &str, role: Role, priority: bool) -> MascResult<()> {
        validate_agent_id(agent)?;
        let mut registry = self.inner.lock();
        registry
            .sessions
            .insert(agent.to_string(), SessionState::new(role, priority, &self.config));
        Ok(())
    }

    /// Remove `agent`'s session, discarding its queue.
    pub fn leave(&self, agent: &str) {
        self.inner.lock().sessions.remove(agent);
    }

    /// Whether `agent` currently has a live session.
    pub fn contains(&self, agent: &str) -> bool {
        self.inner.lock().sessions.contains_key(agent)
    }

    /// Admit one call from `agent` in `category`, per the sliding-window
    /// + burst-reserve contract.
    pub fn check_rate_limit(&self, agent: &str, category: Category) -> MascResult<bool> {
        let mut registry = self.inner.lock();
        let session = registry
            .sessions
            .get_mut(agent)
            .ok_or_else(|| MascError::NotFound {
                resource: "session",
                id: agent.to_string(),
            })?;
        session.last_activity = Utc::now();
        Ok(session.limiter.admit(category))
    }

    /// Deliver `content` from `from` to every other live session (a
    /// broadcast) or, when `mention` names a specific agent, to that
    /// agent alone.
    pub fn deliver(&self, from: &str, content: &str, mention: Option<&str>) {
        let now = Utc::now();
        let mut registry = self.inner.lock();
        match mention {
            Some(target) => {
                if let Some(session) = registry.sessions.get_mut(target) {
                    session.queue.push(QueuedMessage {
                        from: from.to_string(),
                        content: content.to_string(),
                        mention: true,
                        ts: now,
                    });
                }
            }
            None => {
                for (agent, session) in registry.sessions.iter_mut() {
                    if agent == from {
                        continue;
                    }
                    session.queue.push(QueuedMessage {
                        from: from.to_string(),
                        content: content.to_string(),
                        mention: false,
                        ts: now,
                    });
                }
            }
        }
    }

    /// Total messages dropped to back-pressure for `agent`, if it has a session.
    pub fn queue_overflow(&self, agent: &str) -> Option<u64> {
        self.inner
            .lock()
            .sessions
            .get(agent)
            .map(|s| s.queue.overflow_count())
    }

    /// Block until a message arrives for `agent` or `timeout` elapses,
    /// polling every 2 s (§4.4). Marks the session as *listening* for
    /// the duration of the wait.
    pub async fn wait(&self, agent: &str, timeout: Duration) -> MascResult<Option<QueuedMessage>> {
        let deadline = tokio::time::Instant::now() + timeout;

        self.set_listening(agent, true)?;
        let result = loop {
            if let Some(message) = self.try_pop(agent)? {
                break Some(message);
            }
            if tokio::time::Instant::now() >= deadline {
                break None;
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            tokio::time::sleep(WAIT_POLL_INTERVAL.min(remaining)).await;
        };
        self.set_listening(agent, false)?;
        Ok(result)
    }

    fn set_listening(&self, agent: &str, listening: bool) -> MascResult<()> {
        let mut registry = self.inner.lock();
        let session = registry
            .sessions
            .get_mut(agent)
            .ok_or_else(|| MascError::NotFound {
                resource: "session",
                id: agent.to_string(),
            })?;
        session.is_listening = listening;
        Ok(())
    }

    fn try_pop(&self, agent: &str) -> MascResult<Option<QueuedMessage>> {
        let mut registry = self.inner.lock();
        let session = registry
            .sessions
            .get_mut(agent)
            .ok_or_else(|| MascError::NotFound {
                resource: "session",
                id: agent.to_string(),
            })?;
        Ok(session.queue.pop())
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
