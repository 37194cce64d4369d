//! Crate-wide error taxonomy.
//!
//! Every user-facing failure path collapses to a [`MascError`], which in
//! turn is rendered into the structured `{success:false, code, message,
//! recovery_hints[], timestamp}` envelope described in the spec's error
//! handling design. No subsystem throws; errors propagate via `Result`
//! and `#[from]` conversions, the way `enterprise::database::DatabaseError`
//! composes its sub-errors in the teacher crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level error type threaded through every MASC component.
#[derive(Debug, Error)]
pub enum MascError {
    /// Room or backend was used before `init` seeded its state.
    #[error("not initialized")]
    NotInitialized,

    /// A named resource does not exist.
    #[error("{resource} '{id}' not found")]
    NotFound {
        /// Resource kind, e.g. "task", "agent".
        resource: &'static str,
        /// Resource identifier.
        id: String,
    },

    /// A named resource already exists and cannot be recreated.
    #[error("{resource} '{id}' already exists")]
    AlreadyExists {
        /// Resource kind.
        resource: &'static str,
        /// Resource identifier.
        id: String,
    },

    /// A backend key failed the key-grammar validator (§3).
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// An agent name failed the `^[A-Za-z0-9_-]+$` / ≤64 validator.
    #[error("invalid agent name: {0}")]
    InvalidAgentName(String),

    /// A task id failed the `^[A-Za-z0-9_:-]+$` / ≤128 validator.
    #[error("invalid task id: {0}")]
    InvalidTaskId(String),

    /// A path failed the SafePath validator.
    #[error("invalid file path: {0}")]
    InvalidFilePath(String),

    /// `claim`/`release`/`transition`/`done` referenced a task that does not exist.
    #[error("task not found: {0}")]
    TaskNotFound(String),

    /// `claim` found a task already owned by someone else.
    #[error("task already claimed by {by}")]
    AlreadyClaimed {
        /// Current owner's agent name.
        by: String,
    },

    /// A task or lock transition does not match the allowed state graph.
    #[error("invalid state transition")]
    InvalidTransition,

    /// The caller is not the recorded owner of the entity it tried to mutate.
    #[error("caller is not the current owner")]
    NotOwner,

    /// A file lock is already held by another agent.
    #[error("file '{file}' is locked by {by}")]
    FileLocked {
        /// Locked path.
        file: String,
        /// Current holder.
        by: String,
    },

    /// Underlying storage I/O failed.
    #[error("io error: {detail}")]
    IoError {
        /// Human-readable detail; the underlying `std::io::Error` or
        /// driver-specific error is not `Send`-bounded uniformly across
        /// drivers, so it is flattened to text here.
        detail: String,
    },

    /// A remote backend (Redis, Postgres) could not be reached.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// An operation exceeded its allotted time.
    #[error("operation timed out")]
    Timeout,

    /// Envelope-at-rest decryption failed (only when `envelope-encryption` is enabled).
    #[error("decryption failed")]
    DecryptionFailed,

    /// Envelope-at-rest payload was structurally invalid.
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// Envelope-at-rest key id referenced a key that is not loaded.
    #[error("encryption key not found")]
    KeyNotFound,

    /// Envelope-at-rest key material was the wrong length.
    #[error("invalid key length: got {got}")]
    InvalidKeyLength {
        /// Observed length in bytes.
        got: usize,
    },

    /// Retry engine: the wait-for graph / circuit breaker is open.
    #[error("circuit open")]
    CircuitOpen,

    /// Retry engine: all retries were exhausted.
    #[error("exhausted after {attempts} attempts: {last_error}")]
    Exhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The last error observed before giving up.
        last_error: String,
    },

    /// Retry engine: a bounded wait elapsed without success.
    #[error("timed out after {ms}ms")]
    TimedOut {
        /// Elapsed milliseconds.
        ms: u64,
    },

    /// A stored document failed to (de)serialize as JSON.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Catch-all for conditions that don't warrant a dedicated variant.
    #[error("{0}")]
    Other(String),
}

/// Result alias used throughout the crate.
pub type MascResult<T> = Result<T, MascError>;

/// Stable machine-readable error code, used by [`ErrorEnvelope`].
impl MascError {
    /// Map this error to a stable, machine-readable code string.
    pub fn code(&self) -> &'static str {
        match self {
            MascError::NotInitialized => "NOT_INITIALIZED",
            MascError::NotFound { .. } => "NOT_FOUND",
            MascError::AlreadyExists { .. } => "ALREADY_EXISTS",
            MascError::InvalidKey(_) => "INVALID_KEY",
            MascError::InvalidAgentName(_) => "INVALID_AGENT_NAME",
            MascError::InvalidTaskId(_) => "INVALID_TASK_ID",
            MascError::InvalidFilePath(_) => "INVALID_FILE_PATH",
            MascError::TaskNotFound(_) => "TASK_NOT_FOUND",
            MascError::AlreadyClaimed { .. } => "TASK_CLAIMED",
            MascError::InvalidTransition => "INVALID_TRANSITION",
            MascError::NotOwner => "NOT_OWNER",
            MascError::FileLocked { .. } => "FILE_LOCKED",
            MascError::IoError { .. } => "IO_ERROR",
            MascError::ConnectionFailed(_) => "CONNECTION_FAILED",
            MascError::Timeout => "TIMEOUT",
            MascError::DecryptionFailed => "DECRYPTION_FAILED",
            MascError::InvalidEnvelope(_) => "INVALID_ENVELOPE",
            MascError::KeyNotFound => "KEY_NOT_FOUND",
            MascError::InvalidKeyLength { .. } => "INVALID_KEY_LENGTH",
            MascError::CircuitOpen => "CIRCUIT_OPEN",
            MascError::Exhausted { .. } => "EXHAUSTED",
            MascError::TimedOut { .. } => "TIMED_OUT",
            MascError::Serialization(_) => "SERIALIZATION_ERROR",
            MascError::Other(_) => "ERROR",
        }
    }

    /// Prescribed recovery hints for this error's code.
    pub fn recovery_hints(&self) -> Vec<String> {
        match self {
            MascError::AlreadyClaimed { by } => vec![format!(
                "Coordinate with {by} or call claim_next to pick up a different task"
            )],
            MascError::FileLocked { file, by } => vec![format!(
                "Wait for {by} to release '{file}', or ask them to release it explicitly"
            )],
            MascError::NotOwner => {
                vec!["Only the recorded owner can transition this entity".to_string()]
            }
            MascError::InvalidTransition => {
                vec!["Check the current status before transitioning".to_string()]
            }
            MascError::ConnectionFailed(_) => {
                vec!["Verify the backend URL and that the service is reachable".to_string()]
            }
            MascError::Timeout | MascError::TimedOut { .. } => {
                vec!["Retry with a longer timeout or check backend health".to_string()]
            }
            _ => Vec::new(),
        }
    }
}

/// User-visible structured failure envelope (§7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// Always `false` for an envelope (success responses don't use this type).
    pub success: bool,
    /// Stable machine-readable code, see [`MascError::code`].
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Prescribed recovery hints for this code.
    pub recovery_hints: Vec<String>,
    /// Envelope construction time.
    pub timestamp: DateTime<Utc>,
}

impl From<&MascError> for ErrorEnvelope {
    fn from(err: &MascError) -> Self {
        Self {
            success: false,
            code: err.code().to_string(),
            message: err.to_string(),
            recovery_hints: err.recovery_hints(),
            timestamp: Utc::now(),
        }
    }
}

impl From<MascError> for ErrorEnvelope {
    fn from(err: MascError) -> Self {
        Self::from(&err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_carries_recovery_hints_for_claimed_task() {
        let err = MascError::AlreadyClaimed {
            by: "gemini-alpha".to_string(),
        };
        let envelope: ErrorEnvelope = (&err).into();
        assert_eq!(envelope.code, "TASK_CLAIMED");
        assert!(!envelope.success);
        assert!(envelope.recovery_hints[0].contains("gemini-alpha"));
    }

    #[test]
    fn generic_errors_have_no_hints() {
        let err = MascError::Other("boom".to_string());
        let envelope: ErrorEnvelope = err.into();
        assert!(envelope.recovery_hints.is_empty());
        assert_eq!(envelope.code, "ERROR");
    }
}
