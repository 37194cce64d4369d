//! Pluggable key/value storage with CAS and lease locks (§4.2).
//!
//! Every driver implements the narrower [`RawStore`] trait over opaque
//! bytes; [`Backend`] wraps a driver with the Compact Protocol v4
//! [`crate::codec::Codec`] so encode/decode happens in exactly one
//! place instead of being duplicated per driver, and implements
//! `acquire_lock`/`release_lock`/`extend_lock` generically atop
//! `set_if_absent`/`get`/`delete` per §4.2's "only load-bearing
//! primitives" atomicity contract.
//!
//! Grounded on `enterprise::cache::lock`'s `DistributedMutex` for the
//! lease-lock shape (owner + fencing-free expiry check), adapted to run
//! over a storage-backed CAS instead of an in-process `DashMap`.

mod filesystem;
mod memory;
mod postgres;
mod redis_driver;

pub use filesystem::FilesystemDriver;
pub use memory::MemoryDriver;
pub use postgres::PostgresDriver;
pub use redis_driver::RedisDriver;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::codec::Codec;
use crate::error::{MascError, MascResult};
use crate::validation::validate_key;

/// Result of [`Backend::health_check`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Whether the backend answered a round-trip probe.
    pub healthy: bool,
    /// Observed probe latency in milliseconds.
    pub latency_ms: f64,
    /// Optional human-readable detail, typically populated on failure.
    pub detail: Option<String>,
}

/// On-disk/wire shape of a lease lock, shared by Room file locks and
/// Backend-level CAS locks (§3: "identical shape"). Timestamps are
/// Unix seconds as floats, per §6's value-encoding table
/// (`{"owner":"<str>","acquired_at":<float>,"expires_at":<float>}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockRecord {
    /// Current holder's identifier.
    pub owner: String,
    /// When the lock was acquired, Unix seconds.
    pub acquired_at: f64,
    /// When the lock expires and becomes reclaimable, Unix seconds.
    pub expires_at: f64,
}

impl LockRecord {
    fn is_expired(&self) -> bool {
        Utc::now().timestamp_millis() as f64 / 1000.0 > self.expires_at
    }
}

fn unix_seconds(dt: DateTime<Utc>) -> f64 {
    dt.timestamp_millis() as f64 / 1000.0
}

fn lock_key(key: &str) -> String {
    format!("locks:{key}")
}

/// The narrow, per-driver contract: raw bytes in, raw bytes out. Key
/// validation, codec framing, and lock semantics all live one layer up
/// in [`Backend`] so every driver gets them for free.
#[async_trait]
pub trait RawStore: Send + Sync {
    /// Fetch the raw bytes stored at `key`, if any.
    async fn raw_get(&self, key: &str) -> MascResult<Option<Vec<u8>>>;
    /// Upsert `value` at `key`.
    async fn raw_set(&self, key: &str, value: Vec<u8>) -> MascResult<()>;
    /// Atomically create `key` with `value` iff it did not already exist.
    async fn raw_set_if_absent(&self, key: &str, value: Vec<u8>) -> MascResult<bool>;
    /// Remove `key`. No-op (not an error) when already absent; callers
    /// needing `NotFound` semantics check `raw_exists` first.
    async fn raw_delete(&self, key: &str) -> MascResult<()>;
    /// Whether `key` currently has a value.
    async fn raw_exists(&self, key: &str) -> MascResult<bool>;
    /// Lexically enumerate keys under `prefix`.
    async fn raw_list_keys(&self, prefix: &str) -> MascResult<Vec<String>>;
    /// Fetch every (key, raw value) pair under `prefix`.
    async fn raw_get_all(&self, prefix: &str) -> MascResult<Vec<(String, Vec<u8>)>>;
    /// Round-trip a probe value and report latency/health.
    async fn health_check(&self) -> HealthStatus;
    /// Human-readable driver name, used in logs and `ConnectionFailed` messages.
    fn driver_name(&self) -> &'static str;
}

enum Driver {
    Memory(MemoryDriver),
    Filesystem(FilesystemDriver),
    Redis(RedisDriver),
    Postgres(PostgresDriver),
}

impl Driver {
    fn as_raw(&self) -> &dyn RawStore {
        match self {
            Driver::Memory(d) => d,
            Driver::Filesystem(d) => d,
            Driver::Redis(d) => d,
            Driver::Postgres(d) => d,
        }
    }
}

/// A storage backend: one of the four drivers, wrapped with the
/// Compact Protocol v4 codec and generic CAS-built lock primitives.
pub struct Backend {
    driver: Driver,
    codec: Codec,
    /// First 8 hex of MD5(base_path), prefixed onto every key for
    /// distributed drivers (§3) so co-located projects sharing one
    /// Redis/Postgres instance don't collide.
    project_prefix: Option<String>,
}

impl Backend {
    fn namespaced(&self, key: &str) -> String {
        match &self.project_prefix {
            Some(prefix) => format!("{prefix}:{key}"),
            None => key.to_string(),
        }
    }

    /// An in-memory backend. Never fails to construct.
    pub fn memory() -> Self {
        Self {
            driver: Driver::Memory(MemoryDriver::new()),
            codec: Codec::new(),
            project_prefix: None,
        }
    }

    /// A filesystem-backed backend rooted at `base_path`.
    pub fn filesystem(base_path: &Path) -> MascResult<Self> {
        Ok(Self {
            driver: Driver::Filesystem(FilesystemDriver::new(base_path)?),
            codec: Codec::new(),
            project_prefix: None,
        })
    }

    /// A Redis-backed backend, namespaced under `base_path`'s project hash.
    pub async fn redis(url: &str, base_path: &Path) -> MascResult<Self> {
        Ok(Self {
            driver: Driver::Redis(RedisDriver::connect(url).await?),
            codec: Codec::new(),
            project_prefix: Some(project_prefix(base_path)),
        })
    }

    /// A Postgres-backed backend, namespaced under `base_path`'s project hash.
    pub async fn postgres(url: &str, base_path: &Path) -> MascResult<Self> {
        Ok(Self {
            driver: Driver::Postgres(PostgresDriver::connect(url).await?),
            codec: Codec::new(),
            project_prefix: Some(project_prefix(base_path)),
        })
    }

    /// Driver name, e.g. `"memory"`, `"filesystem"`, `"redis"`, `"postgres"`.
    pub fn driver_name(&self) -> &'static str {
        self.driver.as_raw().driver_name()
    }

    /// Returns `Some(bytes)` or `None`; auto-decodes Compact Protocol v4.
    pub async fn get(&self, key: &str) -> MascResult<Option<Vec<u8>>> {
        let raw = self.driver.as_raw().raw_get(&self.namespaced(key)).await?;
        Ok(raw.map(|bytes| self.codec.decode(&bytes)))
    }

    /// Upsert `value` at `key`; auto-encodes Compact Protocol v4.
    pub async fn set(&self, key: &str, value: &[u8]) -> MascResult<()> {
        validate_key(key)?;
        let encoded = self.codec.encode(value);
        self.driver.as_raw().raw_set(&self.namespaced(key), encoded).await
    }

    /// Atomic CAS; returns `true` iff this call created the key.
    pub async fn set_if_absent(&self, key: &str, value: &[u8]) -> MascResult<bool> {
        validate_key(key)?;
        let encoded = self.codec.encode(value);
        self.driver
            .as_raw()
            .raw_set_if_absent(&self.namespaced(key), encoded)
            .await
    }

    /// Remove `key`. Idempotent-at-the-driver-level; returns `NotFound`
    /// when the key was already absent, matching §4.2's table.
    pub async fn delete(&self, key: &str) -> MascResult<()> {
        let ns = self.namespaced(key);
        if !self.driver.as_raw().raw_exists(&ns).await? {
            return Err(MascError::NotFound {
                resource: "key",
                id: key.to_string(),
            });
        }
        self.driver.as_raw().raw_delete(&ns).await
    }

    /// Whether `key` currently has a value.
    pub async fn exists(&self, key: &str) -> MascResult<bool> {
        self.driver.as_raw().raw_exists(&self.namespaced(key)).await
    }

    /// Lexically enumerate keys under `prefix`, with the project
    /// namespace and codec transparently stripped back off.
    pub async fn list_keys(&self, prefix: &str) -> MascResult<Vec<String>> {
        let ns_prefix = self.namespaced(prefix);
        let mut keys = self.driver.as_raw().raw_list_keys(&ns_prefix).await?;
        if let Some(project_prefix) = &self.project_prefix {
            let strip = format!("{project_prefix}:");
            for k in &mut keys {
                if let Some(stripped) = k.strip_prefix(&strip) {
                    *k = stripped.to_string();
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Fetch every (key, decoded value) pair under `prefix`.
    pub async fn get_all(&self, prefix: &str) -> MascResult<Vec<(String, Vec<u8>)>> {
        let ns_prefix = self.namespaced(prefix);
        let pairs = self.driver.as_raw().raw_get_all(&ns_prefix).await?;
        let strip = self.project_prefix.as_ref().map(|p| format!("{p}:"));
        Ok(pairs
            .into_iter()
            .map(|(k, v)| {
                let key = match &strip {
                    Some(s) => k.strip_prefix(s.as_str()).unwrap_or(&k).to_string(),
                    None => k,
                };
                (key, self.codec.decode(&v))
            })
            .collect())
    }

    /// Create `locks:<key>` iff absent or expired. Built entirely on
    /// `set_if_absent`/`get`/`delete` per §4.2's atomicity contract; a
    /// driver's native CAS (`SETNX`, `INSERT ... ON CONFLICT`) is what
    /// actually makes this safe under concurrency, not this function.
    pub async fn acquire_lock(&self, key: &str, owner: &str, ttl: Duration) -> MascResult<bool> {
        let lk = self.namespaced(&lock_key(key));
        let now = Utc::now();
        let expires = now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero());
        let record = LockRecord {
            owner: owner.to_string(),
            acquired_at: unix_seconds(now),
            expires_at: unix_seconds(expires),
        };
        let encoded = self.codec.encode(&serde_json::to_vec(&record)?);

        if self.driver.as_raw().raw_set_if_absent(&lk, encoded.clone()).await? {
            return Ok(true);
        }

        let Some(existing) = self.driver.as_raw().raw_get(&lk).await? else {
            return Ok(self.driver.as_raw().raw_set_if_absent(&lk, encoded).await?);
        };
        let existing: LockRecord = serde_json::from_slice(&self.codec.decode(&existing))?;
        if !existing.is_expired() {
            return Ok(false);
        }

        tracing::debug!(key, prior_owner = %existing.owner, "reclaiming expired lock");
        self.driver.as_raw().raw_delete(&lk).await?;
        Ok(self.driver.as_raw().raw_set_if_absent(&lk, encoded).await?)
    }

    /// Delete `locks:<key>` iff the record's owner matches `owner`.
    pub async fn release_lock(&self, key: &str, owner: &str) -> MascResult<bool> {
        let lk = self.namespaced(&lock_key(key));
        let Some(existing) = self.driver.as_raw().raw_get(&lk).await? else {
            return Ok(false);
        };
        let existing: LockRecord = serde_json::from_slice(&self.codec.decode(&existing))?;
        if existing.owner != owner {
            return Ok(false);
        }
        self.driver.as_raw().raw_delete(&lk).await?;
        Ok(true)
    }

    /// Bump `expires_at` on `locks:<key>` iff `owner` currently holds it.
    pub async fn extend_lock(&self, key: &str, owner: &str, ttl: Duration) -> MascResult<bool> {
        let lk = self.namespaced(&lock_key(key));
        let Some(existing) = self.driver.as_raw().raw_get(&lk).await? else {
            return Ok(false);
        };
        let mut existing: LockRecord = serde_json::from_slice(&self.codec.decode(&existing))?;
        if existing.owner != owner {
            return Ok(false);
        }
        let expires = Utc::now() + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero());
        existing.expires_at = unix_seconds(expires);
        let encoded = self.codec.encode(&serde_json::to_vec(&existing)?);
        self.driver.as_raw().raw_set(&lk, encoded).await?;
        Ok(true)
    }

    /// Current holder of `locks:<key>`, if any — used to populate
    /// `FileLocked{by}` without exposing [`LockRecord`] itself.
    pub async fn lock_holder(&self, key: &str) -> MascResult<Option<String>> {
        let lk = self.namespaced(&lock_key(key));
        let Some(existing) = self.driver.as_raw().raw_get(&lk).await? else {
            return Ok(None);
        };
        let existing: LockRecord = serde_json::from_slice(&self.codec.decode(&existing))?;
        if existing.is_expired() {
            return Ok(None);
        }
        Ok(Some(existing.owner))
    }

    /// Round-trips a probe key and reports latency/healthiness.
    pub async fn health_check(&self) -> HealthStatus {
        self.driver.as_raw().health_check().await
    }
}

/// First 8 hex of MD5(base_path), used to namespace distributed
/// backend keys so co-located projects don't collide (§3).
pub fn project_prefix(base_path: &Path) -> String {
    let digest = md5::compute(base_path.to_string_lossy().as_bytes());
    format!("{digest:x}")[..8].to_string()
}

/// Construct a backend by inspecting environment hints in priority
/// order (remote KV URL, relational URL, else filesystem), falling
/// back to filesystem then memory on driver init failure, so the
/// coordinator always comes up (§4.2 "Auto-detection").
pub async fn auto_detect(base_path: &Path) -> Backend {
    if let Ok(url) = std::env::var("MASC_REDIS_URL").or_else(|_| std::env::var("REDIS_URL")) {
        match Backend::redis(&url, base_path).await {
            Ok(backend) => return backend,
            Err(err) => tracing::warn!(%err, "redis backend init failed, falling back"),
        }
    }
    if let Ok(url) =
        std::env::var("MASC_POSTGRES_URL").or_else(|_| std::env::var("DATABASE_URL"))
    {
        match Backend::postgres(&url, base_path).await {
            Ok(backend) => return backend,
            Err(err) => tracing::warn!(%err, "postgres backend init failed, falling back"),
        }
    }
    match Backend::filesystem(base_path) {
        Ok(backend) => return backend,
        Err(err) => tracing::warn!(%err, "filesystem backend init failed, falling back to memory"),
    }
    Backend::memory()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_round_trips_through_codec() {
        let backend = Backend::memory();
        backend.set("agents:alpha", b"hello world").await.unwrap();
        let got = backend.get("agents:alpha").await.unwrap();
        assert_eq!(got, Some(b"hello world".to_vec()));
    }

    #[tokio::test]
    async fn set_if_absent_is_exclusive() {
        let backend = Backend::memory();
        assert!(backend.set_if_absent("tasks:1", b"a").await.unwrap());
        assert!(!backend.set_if_absent("tasks:1", b"b").await.unwrap());
        assert_eq!(backend.get("tasks:1").await.unwrap(), Some(b"a".to_vec()));
    }

    #[tokio::test]
    async fn delete_absent_key_is_not_found() {
        let backend = Backend::memory();
        let err = backend.delete("nope").await.unwrap_err();
        assert!(matches!(err, MascError::NotFound { .. }));
    }

    #[tokio::test]
    async fn list_keys_and_get_all_respect_prefix() {
        let backend = Backend::memory();
        backend.set("agents:alpha", b"1").await.unwrap();
        backend.set("agents:beta", b"2").await.unwrap();
        backend.set("tasks:1", b"3").await.unwrap();

        let keys = backend.list_keys("agents:").await.unwrap();
        assert_eq!(keys, vec!["agents:alpha".to_string(), "agents:beta".to_string()]);

        let all = backend.get_all("agents:").await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn acquire_lock_is_exclusive_until_released() {
        let backend = Backend::memory();
        assert!(backend
            .acquire_lock("file.txt", "alpha", Duration::from_secs(30))
            .await
            .unwrap());
        assert!(!backend
            .acquire_lock("file.txt", "beta", Duration::from_secs(30))
            .await
            .unwrap());
        assert!(backend.release_lock("file.txt", "alpha").await.unwrap());
        assert!(backend
            .acquire_lock("file.txt", "beta", Duration::from_secs(30))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn release_lock_rejects_non_owner() {
        let backend = Backend::memory();
        backend
            .acquire_lock("file.txt", "alpha", Duration::from_secs(30))
            .await
            .unwrap();
        assert!(!backend.release_lock("file.txt", "beta").await.unwrap());
    }

    #[tokio::test]
    async fn expired_lock_is_reclaimable() {
        let backend = Backend::memory();
        backend
            .acquire_lock("file.txt", "alpha", Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(backend
            .acquire_lock("file.txt", "beta", Duration::from_secs(30))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn extend_lock_requires_ownership() {
        let backend = Backend::memory();
        backend
            .acquire_lock("file.txt", "alpha", Duration::from_secs(1))
            .await
            .unwrap();
        assert!(!backend
            .extend_lock("file.txt", "beta", Duration::from_secs(60))
            .await
            .unwrap());
        assert!(backend
            .extend_lock("file.txt", "alpha", Duration::from_secs(60))
            .await
            .unwrap());
    }

    #[test]
    fn project_prefix_is_stable_and_eight_hex_chars() {
        let p = Path::new("/home/user/myproject");
        let a = project_prefix(p);
        let b = project_prefix(p);
        assert_eq!(a, b);
        assert_eq!(a.len(), 8);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn health_check_reports_healthy_for_memory() {
        let backend = Backend::memory();
        let status = backend.health_check().await;
        assert!(status.healthy);
    }
}
