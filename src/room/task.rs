//! Task backlog entities and state machine (§3, §4.3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{MascError, MascResult};

/// A task's position in the Todo → Claimed → InProgress → Done graph,
/// with Cancelled reachable from any non-terminal state (§3 invariant).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "state")]
pub enum TaskStatus {
    /// Unclaimed, available for any agent.
    Todo,
    /// Claimed but not yet started.
    Claimed {
        /// Claiming agent.
        by: String,
        /// Claim time.
        at: DateTime<Utc>,
    },
    /// Actively being worked.
    InProgress {
        /// Owning agent.
        by: String,
        /// When work began.
        started_at: DateTime<Utc>,
    },
    /// Terminal: completed.
    Done {
        /// Completing agent.
        by: String,
        /// Completion time.
        completed_at: DateTime<Utc>,
        /// Free-form completion notes.
        notes: String,
    },
    /// Terminal: abandoned.
    Cancelled,
}

impl TaskStatus {
    fn owner(&self) -> Option<&str> {
        match self {
            TaskStatus::Claimed { by, .. } | TaskStatus::InProgress { by, .. } => Some(by),
            _ => None,
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Done { .. } | TaskStatus::Cancelled)
    }
}

/// `tasks:<id>` — one backlog entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Task identifier, unique within the room.
    pub id: String,
    /// Short human-readable title.
    pub title: String,
    /// Priority, 1 = highest.
    pub priority: i32,
    /// Current state-machine position.
    pub status: TaskStatus,
    /// Git worktree path, once `worktree_create` has run for this task.
    pub worktree: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// A fresh `Todo` task.
    pub fn new(id: impl Into<String>, title: impl Into<String>, priority: i32) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            priority,
            status: TaskStatus::Todo,
            worktree: None,
            created_at: Utc::now(),
        }
    }

    /// `claim(T, X)`: only legal from `Todo`, or re-claimable by the
    /// current owner. Any other non-Todo state yields `AlreadyClaimed`.
    pub fn claim(&mut self, by: &str) -> MascResult<()> {
        match &self.status {
            TaskStatus::Todo => {
                self.status = TaskStatus::Claimed {
                    by: by.to_string(),
                    at: Utc::now(),
                };
                Ok(())
            }
            other => Err(MascError::AlreadyClaimed {
                by: other.owner().unwrap_or("unknown").to_string(),
            }),
        }
    }

    /// `release(T, X)`: returns a Claimed/InProgress task to `Todo`.
    /// Requires the caller to be the current owner.
    pub fn release(&mut self, by: &str) -> MascResult<()> {
        match self.status.owner() {
            Some(owner) if owner == by => {
                self.status = TaskStatus::Todo;
                Ok(())
            }
            Some(_) => Err(MascError::NotOwner),
            None => Err(MascError::InvalidTransition),
        }
    }

    /// `transition(T, X)`: Claimed → InProgress, requiring ownership.
    pub fn start(&mut self, by: &str) -> MascResult<()> {
        match &self.status {
            TaskStatus::Claimed { by: owner, .. } if owner == by => {
                self.status = TaskStatus::InProgress {
                    by: by.to_string(),
                    started_at: Utc::now(),
                };
                Ok(())
            }
            TaskStatus::Claimed { .. } => Err(MascError::NotOwner),
            _ => Err(MascError::InvalidTransition),
        }
    }

    /// `done(T, X)`: requires the caller to be the current `by`.
    pub fn done(&mut self, by: &str, notes: impl Into<String>) -> MascResult<()> {
        match self.status.owner() {
            Some(owner) if owner == by => {
                self.status = TaskStatus::Done {
                    by: by.to_string(),
                    completed_at: Utc::now(),
                    notes: notes.into(),
                };
                Ok(())
            }
            Some(_) => Err(MascError::NotOwner),
            None => Err(MascError::InvalidTransition),
        }
    }

    /// `cancel(T)`: reachable from any non-terminal state.
    pub fn cancel(&mut self) -> MascResult<()> {
        if self.status.is_terminal() {
            return Err(MascError::InvalidTransition);
        }
        self.status = TaskStatus::Cancelled;
        Ok(())
    }

    /// Whether this task has reached a terminal state (`Done`/`Cancelled`).
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// The live backlog document, stored as one JSON object at `tasks:backlog`.
pub type Backlog = HashMap<String, Task>;

/// Storage key for the live backlog document.
pub const BACKLOG_KEY: &str = "tasks:backlog";

/// Storage key for the append-only completed/cancelled archive
/// (§3 supplement: mirrors the teacher's migration-ledger idiom).
pub const ARCHIVE_KEY: &str = "tasks-archive";

/// The append-only archive document: every task that has ever reached
/// a terminal state, in the order it aged out of the live backlog.
pub type Archive = Vec<Task>;
