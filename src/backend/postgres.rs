//! Relational driver: the real `sqlx` Postgres pool, replacing the
//! teacher's connection-string-only scaffolding with an actual query
//! layer over one `masc_kv` table.
//!
//! Grounded on `enterprise::database::connection` (`DatabaseConfig`,
//! pooled connection lifecycle) and `enterprise::database::schema`
//! (`SchemaVersion`, auto-migration-on-first-use idiom) for the overall
//! shape; `INSERT ... ON CONFLICT` stands in for CAS the way §4.2
//! prescribes for the relational driver.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};

use crate::error::MascResult;

use super::{HealthStatus, RawStore};

fn db_err(err: sqlx::Error) -> crate::error::MascError {
    crate::error::MascError::IoError {
        detail: err.to_string(),
    }
}

/// The Postgres storage driver. Schema is auto-created on first write.
pub struct PostgresDriver {
    pool: PgPool,
    schema_ready: AtomicBool,
}

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS masc_kv (\
    key TEXT PRIMARY KEY, \
    value BYTEA NOT NULL, \
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()\
)";

impl PostgresDriver {
    /// Connect to `url`, deferring schema creation to the first write.
    pub async fn connect(url: &str) -> MascResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await
            .map_err(db_err)?;
        Ok(Self {
            pool,
            schema_ready: AtomicBool::new(false),
        })
    }

    async fn ensure_schema(&self) -> MascResult<()> {
        if self.schema_ready.load(Ordering::Acquire) {
            return Ok(());
        }
        sqlx::query(CREATE_TABLE)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        self.schema_ready.store(true, Ordering::Release);
        Ok(())
    }
}

#[async_trait]
impl RawStore for PostgresDriver {
    async fn raw_get(&self, key: &str) -> MascResult<Option<Vec<u8>>> {
        if !self.schema_ready.load(Ordering::Acquire) {
            // A `get` before any `set` is legal; there is simply nothing
            // to find, and nothing to create a table for yet.
            return Ok(None);
        }
        let row = sqlx::query("SELECT value FROM masc_kv WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.map(|r| r.get::<Vec<u8>, _>("value")))
    }

    async fn raw_set(&self, key: &str, value: Vec<u8>) -> MascResult<()> {
        self.ensure_schema().await?;
        sqlx::query(
            "INSERT INTO masc_kv (key, value, updated_at) VALUES ($1, $2, now()) \
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = now()",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn raw_set_if_absent(&self, key: &str, value: Vec<u8>) -> MascResult<bool> {
        self.ensure_schema().await?;
        let result = sqlx::query(
            "INSERT INTO masc_kv (key, value, updated_at) VALUES ($1, $2, now()) \
             ON CONFLICT (key) DO NOTHING",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn raw_delete(&self, key: &str) -> MascResult<()> {
        if !self.schema_ready.load(Ordering::Acquire) {
            return Ok(());
        }
        sqlx::query("DELETE FROM masc_kv WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn raw_exists(&self, key: &str) -> MascResult<bool> {
        Ok(self.raw_get(key).await?.is_some())
    }

    async fn raw_list_keys(&self, prefix: &str) -> MascResult<Vec<String>> {
        if !self.schema_ready.load(Ordering::Acquire) {
            return Ok(Vec::new());
        }
        let like_pattern = format!("{}%", prefix.replace('%', "\\%").replace('_', "\\_"));
        let rows = sqlx::query("SELECT key FROM masc_kv WHERE key LIKE $1 ORDER BY key")
            .bind(like_pattern)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(rows.into_iter().map(|r| r.get::<String, _>("key")).collect())
    }

    async fn raw_get_all(&self, prefix: &str) -> MascResult<Vec<(String, Vec<u8>)>> {
        if !self.schema_ready.load(Ordering::Acquire) {
            return Ok(Vec::new());
        }
        let like_pattern = format!("{}%", prefix.replace('%', "\\%").replace('_', "\\_"));
        let rows = sqlx::query("SELECT key, value FROM masc_kv WHERE key LIKE $1 ORDER BY key")
            .bind(like_pattern)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(rows
            .into_iter()
            .map(|r| (r.get::<String, _>("key"), r.get::<Vec<u8>, _>("value")))
            .collect())
    }

    async fn health_check(&self) -> HealthStatus {
        let start = Instant::now();
        let result = sqlx::query("SELECT 1").execute(&self.pool).await;
        HealthStatus {
            healthy: result.is_ok(),
            latency_ms: start.elapsed().as_secs_f64() * 1000.0,
            detail: result.err().map(|e| e.to_string()),
        }
    }

    fn driver_name(&self) -> &'static str {
        "postgres"
    }
}
