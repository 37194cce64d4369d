//! Periodic zombie sweep (§4.3): agents whose heartbeat has gone
//! stale are flagged offline and removed. The sweep is itself a Room
//! op — locked and logged — not a side-channel cleanup thread.

use std::time::Duration;

use chrono::Utc;

use crate::backend::Backend;
use crate::error::MascResult;
use crate::room::agent::Agent;
use crate::room::audit::{self, AuditEvent};

/// Default interval between sweeps.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Default staleness threshold before an agent is reaped.
pub const DEFAULT_ZOMBIE_THRESHOLD: Duration = Duration::from_secs(300);

/// Run one sweep: remove every agent whose `last_seen` exceeds
/// `threshold`, returning the names removed.
pub async fn sweep(backend: &Backend, threshold: Duration) -> MascResult<Vec<String>> {
    let mut reaped = Vec::new();
    let now = Utc::now();
    for (key, value) in backend.get_all("agents:").await? {
        let Ok(agent) = serde_json::from_slice::<Agent>(&value) else {
            continue;
        };
        let stale = now.signed_duration_since(agent.last_seen).to_std().unwrap_or_default();
        if stale > threshold {
            backend.delete(&key).await?;
            audit::record(backend, AuditEvent::zombie_reaped(agent.name.clone(), agent.last_seen)).await;
            tracing::info!(agent = %agent.name, "reaped zombie agent");
            reaped.push(agent.name);
        }
    }
    Ok(reaped)
}

/// Spawn a background task that sweeps every [`SWEEP_INTERVAL`] until
/// the returned handle is dropped or aborted.
pub fn spawn_periodic(backend: std::sync::Arc<Backend>, threshold: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            if let Err(err) = sweep(&backend, threshold).await {
                tracing::warn!(%err, "zombie sweep failed");
            }
        }
    })
}
