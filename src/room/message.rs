//! Append-only message log with a strictly increasing sequence (§3, §4.3).
//!
//! `seq` allocation is the one place Room needs a true fetch-and-increment
//! built from nothing but `set_if_absent` (§4.2's atomicity contract):
//! each candidate sequence number is *claimed* via a CAS on a per-seq
//! marker key, so only one caller ever wins a given number, and losers
//! simply re-read the counter hint and try the next one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backend::Backend;
use crate::error::MascResult;

/// `messages:<seq>` — one broadcast or directed message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Monotonically increasing sequence number, unique per room.
    pub seq: u64,
    /// Sending agent.
    pub from_agent: String,
    /// Message body.
    pub content: String,
    /// Directed recipient, if this was an `@mention` rather than a broadcast.
    pub mention: Option<String>,
    /// Send time.
    pub ts: DateTime<Utc>,
}

const SEQ_COUNTER_KEY: &str = "messages:seq_counter";
const MAX_CLAIM_ATTEMPTS: u32 = 10_000;

fn claim_key(seq: u64) -> String {
    format!("messages:seq_claim:{seq}")
}

/// Atomically allocate the next message sequence number.
pub async fn allocate_seq(backend: &Backend) -> MascResult<u64> {
    for _ in 0..MAX_CLAIM_ATTEMPTS {
        let current = match backend.get(SEQ_COUNTER_KEY).await? {
            Some(bytes) => String::from_utf8_lossy(&bytes).parse::<u64>().unwrap_or(0),
            None => 0,
        };
        let candidate = current + 1;
        if backend.set_if_absent(&claim_key(candidate), b"1").await? {
            // Best-effort: a later reader may see a stale hint if this
            // write races another allocator, but the next allocator
            // simply re-derives from whichever claim won.
            let _ = backend.set(SEQ_COUNTER_KEY, candidate.to_string().as_bytes()).await;
            return Ok(candidate);
        }
    }
    Err(crate::error::MascError::Exhausted {
        attempts: MAX_CLAIM_ATTEMPTS,
        last_error: "could not claim a message sequence number".to_string(),
    })
}
