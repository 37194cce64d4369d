//! Agent registry entities (§3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An agent's liveness state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Joined and idle, ready for work.
    Online,
    /// Joined but not actively claiming work.
    Idle,
    /// Currently holding a task.
    Busy,
    /// Removed by `leave` or the zombie sweep.
    Offline,
}

/// `agents:<name>` — a room participant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    /// The agent's unique name within the room.
    pub name: String,
    /// Current liveness state.
    pub status: AgentStatus,
    /// Declared capabilities (free-form tags used by task routing).
    pub capabilities: Vec<String>,
    /// Task id this agent currently holds, if any.
    pub current_task: Option<String>,
    /// Last heartbeat.
    pub last_seen: DateTime<Utc>,
    /// When this agent first joined.
    pub joined_at: DateTime<Utc>,
}

impl Agent {
    /// A freshly joined agent with no current task.
    pub fn new(name: impl Into<String>, capabilities: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            status: AgentStatus::Online,
            capabilities,
            current_task: None,
            last_seen: now,
            joined_at: now,
        }
    }

    /// `agents:<name>` storage key.
    pub fn key(name: &str) -> String {
        format!("agents:{name}")
    }
}
