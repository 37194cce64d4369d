//! Environment-driven configuration (§6).
//!
//! Grounded on `enterprise::mod::config::EnterpriseConfig`'s
//! Default-impl-plus-loader shape, adapted from file-based JSON config
//! to environment variables, since every MASC deployment surface
//! (container, CI runner, bare process) already carries env vars and
//! the coordination contract names them explicitly in §6.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Storage driver selection (`MASC_STORAGE_TYPE`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    /// Inspect environment hints in priority order; see `backend::auto_detect`.
    Auto,
    /// In-process hash map, no persistence.
    Memory,
    /// One file per key under `base_path/.masc/`.
    Filesystem,
    /// Remote KV via the `redis` crate.
    Redis,
    /// Relational storage via the `sqlx` Postgres driver.
    Postgres,
}

impl Default for StorageType {
    fn default() -> Self {
        StorageType::Filesystem
    }
}

impl std::str::FromStr for StorageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(StorageType::Auto),
            "memory" => Ok(StorageType::Memory),
            "filesystem" => Ok(StorageType::Filesystem),
            "redis" => Ok(StorageType::Redis),
            "postgres" => Ok(StorageType::Postgres),
            other => Err(format!("unknown MASC_STORAGE_TYPE: {other}")),
        }
    }
}

/// Structured log output format (`MASC_LOG_FORMAT`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable, colorized when attached to a terminal.
    Pretty,
    /// Newline-delimited JSON, for log aggregators.
    Json,
}

impl Default for LogFormat {
    fn default() -> Self {
        LogFormat::Pretty
    }
}

/// Resolved process configuration, read once from the environment at
/// `ProcessContext::init` time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MascConfig {
    /// Which storage driver to use.
    pub storage_type: StorageType,
    /// Remote KV connection string (`REDIS_URL` / `MASC_REDIS_URL`).
    pub redis_url: Option<String>,
    /// Relational connection string (`DATABASE_URL` / `MASC_POSTGRES_URL`).
    pub postgres_url: Option<String>,
    /// Logical cluster name, namespacing multi-room deployments sharing
    /// one remote backend. Default `"default"`.
    pub cluster_name: String,
    /// Structured log output format.
    pub log_format: LogFormat,
    /// Default lease duration for Room/Backend locks, in minutes.
    pub lock_expiry_minutes: u64,
    /// Root directory this process coordinates under.
    pub base_path: PathBuf,
}

impl MascConfig {
    /// Read configuration from the process environment, rooted at `base_path`.
    pub fn from_env(base_path: PathBuf) -> Self {
        let storage_type = std::env::var("MASC_STORAGE_TYPE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_default();

        let redis_url = std::env::var("MASC_REDIS_URL")
            .or_else(|_| std::env::var("REDIS_URL"))
            .ok();

        let postgres_url = std::env::var("MASC_POSTGRES_URL")
            .or_else(|_| std::env::var("DATABASE_URL"))
            .ok();

        let cluster_name =
            std::env::var("MASC_CLUSTER_NAME").unwrap_or_else(|_| "default".to_string());

        let log_format = match std::env::var("MASC_LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        let lock_expiry_minutes = std::env::var("MASC_LOCK_EXPIRY_MINUTES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);

        Self {
            storage_type,
            redis_url,
            postgres_url,
            cluster_name,
            log_format,
            lock_expiry_minutes,
            base_path,
        }
    }

    /// Default lock TTL as a [`std::time::Duration`].
    pub fn lock_expiry(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.lock_expiry_minutes * 60)
    }

    /// Construct a [`crate::backend::Backend`] per `storage_type`,
    /// falling back to filesystem then memory on driver init failure
    /// (§4.2 "Auto-detection").
    pub async fn build_backend(&self) -> crate::backend::Backend {
        use crate::backend::Backend;

        match self.storage_type {
            StorageType::Memory => Backend::memory(),
            StorageType::Filesystem => Backend::filesystem(&self.base_path)
                .unwrap_or_else(|_| Backend::memory()),
            StorageType::Redis => match &self.redis_url {
                Some(url) => Backend::redis(url, &self.base_path)
                    .await
                    .unwrap_or_else(|_| Backend::memory()),
                None => Backend::memory(),
            },
            StorageType::Postgres => match &self.postgres_url {
                Some(url) => Backend::postgres(url, &self.base_path)
                    .await
                    .unwrap_or_else(|_| Backend::memory()),
                None => Backend::memory(),
            },
            StorageType::Auto => crate::backend::auto_detect(&self.base_path).await,
        }
    }

    /// Initialize the `tracing` subscriber per `log_format` and
    /// `RUST_LOG`. Idempotent-on-error: a second call (e.g. in tests)
    /// is swallowed rather than panicking.
    pub fn init_tracing(&self) {
        use tracing_subscriber::EnvFilter;

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let builder = tracing_subscriber::fmt().with_env_filter(filter);

        let result = match self.log_format {
            LogFormat::Json => builder.json().try_init(),
            LogFormat::Pretty => builder.try_init(),
        };
        if let Err(err) = result {
            tracing::debug!(%err, "tracing subscriber already initialized");
        }
    }
}
