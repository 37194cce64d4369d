//! Identifier, path, and backend-key validation (§4.7, §3).
//!
//! Every validator returns a typed [`MascResult`] and bumps a shared
//! rejection counter for observability, mirroring
//! `enterprise::database::connection::DatabaseConfig::validate`'s
//! single-entry-point, no-panic style.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;

use crate::error::{MascError, MascResult};

static AGENT_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").unwrap());
static TASK_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_:-]+$").unwrap());

const AGENT_ID_MAX_LEN: usize = 64;
const TASK_ID_MAX_LEN: usize = 128;

/// Observability counter: total rejections and the timestamp of the last one.
#[derive(Debug, Default)]
pub struct RejectionStats {
    count: AtomicU64,
    last: Mutex<Option<DateTime<Utc>>>,
}

impl RejectionStats {
    fn record(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
        *self.last.lock() = Some(Utc::now());
    }

    /// Total number of rejections recorded by this validator since process start.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Timestamp of the most recent rejection, if any.
    pub fn last_rejected_at(&self) -> Option<DateTime<Utc>> {
        *self.last.lock()
    }
}

static AGENT_ID_REJECTIONS: Lazy<RejectionStats> = Lazy::new(RejectionStats::default);
static TASK_ID_REJECTIONS: Lazy<RejectionStats> = Lazy::new(RejectionStats::default);
static SAFE_PATH_REJECTIONS: Lazy<RejectionStats> = Lazy::new(RejectionStats::default);
static KEY_REJECTIONS: Lazy<RejectionStats> = Lazy::new(RejectionStats::default);

/// Rejection statistics for the `AgentId` validator.
pub fn agent_id_rejections() -> &'static RejectionStats {
    &AGENT_ID_REJECTIONS
}

/// Rejection statistics for the `TaskId` validator.
pub fn task_id_rejections() -> &'static RejectionStats {
    &TASK_ID_REJECTIONS
}

/// Rejection statistics for the `SafePath` validator.
pub fn safe_path_rejections() -> &'static RejectionStats {
    &SAFE_PATH_REJECTIONS
}

/// Rejection statistics for the backend key-grammar validator.
pub fn key_rejections() -> &'static RejectionStats {
    &KEY_REJECTIONS
}

/// Validate an agent name: `^[A-Za-z0-9_-]+$`, ≤64 bytes.
pub fn validate_agent_id(name: &str) -> MascResult<()> {
    if name.is_empty() || name.len() > AGENT_ID_MAX_LEN || !AGENT_ID_RE.is_match(name) {
        AGENT_ID_REJECTIONS.record();
        return Err(MascError::InvalidAgentName(name.to_string()));
    }
    Ok(())
}

/// Validate a task id: `^[A-Za-z0-9_:-]+$`, ≤128 bytes.
pub fn validate_task_id(id: &str) -> MascResult<()> {
    if id.is_empty() || id.len() > TASK_ID_MAX_LEN || !TASK_ID_RE.is_match(id) {
        TASK_ID_REJECTIONS.record();
        return Err(MascError::InvalidTaskId(id.to_string()));
    }
    Ok(())
}

/// Validate a relative, non-escaping filesystem path.
///
/// Rejects: empty, absolute, a leading `..` segment, or any interior
/// `../` segment.
pub fn validate_safe_path(path: &str) -> MascResult<()> {
    let reject = || {
        SAFE_PATH_REJECTIONS.record();
        Err(MascError::InvalidFilePath(path.to_string()))
    };

    if path.is_empty() {
        return reject();
    }
    if path.starts_with('/') || path.starts_with('\\') {
        return reject();
    }
    if path.len() >= 2 && path.as_bytes()[1] == b':' {
        // Windows drive-letter absolute path, e.g. "C:\\...".
        return reject();
    }
    for segment in path.split(['/', '\\']) {
        if segment == ".." {
            return reject();
        }
    }
    Ok(())
}

const DISALLOWED_SEGMENT_CHARS: &[char] = &[
    '/', '\\', ':', '*', '?', '"', '\'', '<', '>', '|',
];

/// Validate a single backend-key segment against the stricter §3 rule set.
fn validate_key_segment(segment: &str) -> bool {
    if segment.is_empty() || segment == "." || segment == ".." || segment.starts_with("..") {
        return false;
    }
    !segment.chars().any(|c| {
        (c as u32) < 0x20 || c == '\0' || DISALLOWED_SEGMENT_CHARS.contains(&c)
    })
}

/// Validate a backend key: printable, non-empty, no NUL, no `/`, no
/// leading/trailing `:`, no segment equal to `.`/`..` or beginning with
/// `..`; every segment further rejects the disallowed character set.
pub fn validate_key(key: &str) -> MascResult<()> {
    let reject = || {
        KEY_REJECTIONS.record();
        Err(MascError::InvalidKey(key.to_string()))
    };

    if key.is_empty() || key.contains('\0') || key.contains('/') {
        return reject();
    }
    if key.starts_with(':') || key.ends_with(':') {
        return reject();
    }
    let segments: Vec<&str> = key.split(':').collect();
    if segments.iter().any(|s| !validate_key_segment(s)) {
        return reject();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn agent_id_accepts_alnum_underscore_dash() {
        assert!(validate_agent_id("gemini-alpha_01").is_ok());
    }

    #[test]
    fn agent_id_rejects_empty_and_overlong() {
        assert!(validate_agent_id("").is_err());
        let long = "a".repeat(65);
        assert!(validate_agent_id(&long).is_err());
    }

    #[test]
    fn agent_id_rejects_special_chars() {
        assert!(validate_agent_id("agent/name").is_err());
        assert!(validate_agent_id("agent name").is_err());
    }

    #[test]
    fn task_id_accepts_colon_separated() {
        assert!(validate_task_id("task:01-a").is_ok());
    }

    #[test]
    fn safe_path_rejects_absolute_and_traversal() {
        assert!(validate_safe_path("/etc/passwd").is_err());
        assert!(validate_safe_path("../secret").is_err());
        assert!(validate_safe_path("a/../b").is_err());
        assert!(validate_safe_path("").is_err());
    }

    #[test]
    fn safe_path_accepts_relative() {
        assert!(validate_safe_path("src/main.rs").is_ok());
    }

    #[test]
    fn key_rejects_nul_slash_colon_edges_and_dotdot() {
        assert!(validate_key("a\0b").is_err());
        assert!(validate_key("a/b").is_err());
        assert!(validate_key(":a").is_err());
        assert!(validate_key("a:").is_err());
        assert!(validate_key("a:..:b").is_err());
        assert!(validate_key("a:<b>").is_err());
    }

    #[test]
    fn key_accepts_hierarchical_segments() {
        assert!(validate_key("agents:gemini-alpha").is_ok());
        assert!(validate_key("tasks:task-01").is_ok());
    }

    #[test]
    fn rejection_counters_increment() {
        let before = agent_id_rejections().count();
        let _ = validate_agent_id("bad name");
        assert!(agent_id_rejections().count() > before);
        assert!(agent_id_rejections().last_rejected_at().is_some());
    }

    proptest! {
        #[test]
        fn agent_id_accepts_any_string_matching_its_own_grammar(
            name in "[A-Za-z0-9_-]{1,64}"
        ) {
            prop_assert!(validate_agent_id(&name).is_ok());
        }

        #[test]
        fn agent_id_rejects_any_string_containing_a_disallowed_byte(
            name in "[A-Za-z0-9_-]{0,20}[ /\\.@!]{1}[A-Za-z0-9_-]{0,20}"
        ) {
            prop_assert!(validate_agent_id(&name).is_err());
        }

        #[test]
        fn safe_path_never_accepts_a_path_with_a_dotdot_segment(
            segments in prop::collection::vec("[a-z]{1,6}", 0..5)
        ) {
            let mut path = segments.join("/");
            path.push_str("/../escape");
            prop_assert!(validate_safe_path(&path).is_err());
        }

        #[test]
        fn key_accepts_any_colon_joined_alnum_segments(
            segments in prop::collection::vec("[a-zA-Z0-9_-]{1,10}", 1..5)
        ) {
            let key = segments.join(":");
            prop_assert!(validate_key(&key).is_ok());
        }
    }
}
