//! Append-only audit trail (§6 `events/<YYYY-MM>/<DD>.jsonl`).
//!
//! Grounded on `enterprise::audit::logger::AuditLogger`'s
//! never-panic-on-write-failure posture, simplified from its
//! channel+hash-chain design down to a direct best-effort append
//! through `Backend`, since Room already serializes writes under its
//! own named locks and does not need a second buffering layer.

use chrono::Utc;
use serde::Serialize;

use crate::backend::Backend;

/// One audit row. Serializes to a single JSON object, matching §6's
/// `{"type":"...","ts":"<ISO>", ...}` shape.
#[derive(Debug, Serialize)]
pub struct AuditEvent {
    #[serde(rename = "type")]
    kind: &'static str,
    ts: chrono::DateTime<Utc>,
    #[serde(flatten)]
    detail: serde_json::Value,
}

impl AuditEvent {
    /// A lock was reclaimed from an expired prior holder.
    pub fn lock_reclaimed(file: String, prior_owner: String, new_owner: String) -> Self {
        Self {
            kind: "lock_reclaimed",
            ts: Utc::now(),
            detail: serde_json::json!({ "file": file, "prior_owner": prior_owner, "new_owner": new_owner }),
        }
    }

    /// An agent was removed by the zombie sweep.
    pub fn zombie_reaped(agent: String, last_seen: chrono::DateTime<Utc>) -> Self {
        Self {
            kind: "zombie_reaped",
            ts: Utc::now(),
            detail: serde_json::json!({ "agent": agent, "last_seen": last_seen }),
        }
    }

    /// A worktree was rolled back after a partial-failure (§9 Open Question).
    pub fn worktree_rolled_back(path: String, reason: String) -> Self {
        Self {
            kind: "worktree_rolled_back",
            ts: Utc::now(),
            detail: serde_json::json!({ "path": path, "reason": reason }),
        }
    }
}

fn event_key(now: chrono::DateTime<Utc>) -> String {
    format!("events:{}:{}", now.format("%Y-%m"), now.format("%d"))
}

/// Append `event` to today's audit log. Best-effort: a storage failure
/// here is logged and swallowed rather than propagated, per Design
/// Note §9 ("exceptions for control flow" sites are documented policy,
/// not silent bugs) — audit logging must never fail the caller's
/// actual operation.
pub async fn record(backend: &Backend, event: AuditEvent) {
    let key = event_key(event.ts);
    let line = match serde_json::to_string(&event) {
        Ok(line) => line,
        Err(err) => {
            tracing::warn!(%err, "failed to serialize audit event");
            return;
        }
    };

    let existing = match backend.get(&key).await {
        Ok(existing) => existing,
        Err(err) => {
            tracing::warn!(%err, "failed to read audit log, dropping event");
            return;
        }
    };

    let mut buf = existing.unwrap_or_default();
    if !buf.is_empty() {
        buf.push(b'\n');
    }
    buf.extend_from_slice(line.as_bytes());

    if let Err(err) = backend.set(&key, &buf).await {
        tracing::warn!(%err, "failed to append audit event");
    }
}
