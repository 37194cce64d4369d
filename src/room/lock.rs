//! Advisory file locks: a thin wrapper over `Backend`'s lease-lock
//! primitives (§4.3 `lock`/`unlock`), grounded structurally on
//! `enterprise::cache::lock::DistributedMutex`'s lease-with-reclaim
//! shape but built on `Backend::acquire_lock` instead of an in-process
//! map, so the lock is visible to every process sharing the backend.

use std::time::Duration;

use crate::backend::Backend;
use crate::error::{MascError, MascResult};
use crate::room::audit::{self, AuditEvent};

/// Acquire the file lock on `path` for `owner`. An expired prior lock
/// is silently reclaimed; an audit row records the displacement.
pub async fn lock_file(
    backend: &Backend,
    path: &str,
    owner: &str,
    ttl: Duration,
) -> MascResult<()> {
    let prior_holder = backend.lock_holder(path).await?;
    let acquired = backend.acquire_lock(path, owner, ttl).await?;
    if !acquired {
        let by = backend
            .lock_holder(path)
            .await?
            .unwrap_or_else(|| "unknown".to_string());
        return Err(MascError::FileLocked {
            file: path.to_string(),
            by,
        });
    }
    if let Some(prior) = prior_holder {
        if prior != owner {
            tracing::info!(path, prior_owner = %prior, new_owner = owner, "reclaimed expired file lock");
            audit::record(
                backend,
                AuditEvent::lock_reclaimed(path.to_string(), prior, owner.to_string()),
            )
            .await;
        }
    }
    Ok(())
}

/// Release the file lock on `path`. A no-op (not an error) if `owner`
/// is not the current holder, matching §8's "release_lock(k, B) is a
/// no-op" testable property.
pub async fn unlock_file(backend: &Backend, path: &str, owner: &str) -> MascResult<bool> {
    backend.release_lock(path, owner).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lock_then_second_caller_is_file_locked() {
        let backend = Backend::memory();
        lock_file(&backend, "src/main.rs", "claude", Duration::from_secs(30))
            .await
            .unwrap();
        let err = lock_file(&backend, "src/main.rs", "codex", Duration::from_secs(30))
            .await
            .unwrap_err();
        assert!(matches!(err, MascError::FileLocked { by, .. } if by == "claude"));
    }

    #[tokio::test]
    async fn expired_lock_is_reclaimed_and_release_by_old_owner_is_noop() {
        let backend = Backend::memory();
        lock_file(&backend, "src/main.rs", "claude", Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        lock_file(&backend, "src/main.rs", "codex", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(!unlock_file(&backend, "src/main.rs", "claude").await.unwrap());
    }
}
