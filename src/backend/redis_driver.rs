//! Remote KV driver: the real `redis` crate against a single server or
//! cluster endpoint, replacing the teacher's simulated connection pool.
//!
//! Grounded on `enterprise::ratelimit::distributed::RedisRateLimiter`/
//! `RedisConfig` for the overall shape (a config struct, a
//! `ConnectionManager`-style pooled handle, Lua-script atomicity for
//! compound ops), but every call here actually reaches the server via
//! `redis::aio::ConnectionManager` instead of a `DashMap<String,
//! RedisConnection>` standing in for one.

use std::time::Instant;

use async_trait::async_trait;
use redis::AsyncCommands;

use crate::error::{MascError, MascResult};

use super::{HealthStatus, RawStore};

fn conn_err(err: redis::RedisError) -> MascError {
    MascError::ConnectionFailed(err.to_string())
}

/// The Redis/remote-KV storage driver.
pub struct RedisDriver {
    manager: redis::aio::ConnectionManager,
}

impl RedisDriver {
    /// Connect to `url`, keeping a reconnecting connection manager handle.
    pub async fn connect(url: &str) -> MascResult<Self> {
        let client = redis::Client::open(url).map_err(conn_err)?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(conn_err)?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl RawStore for RedisDriver {
    async fn raw_get(&self, key: &str) -> MascResult<Option<Vec<u8>>> {
        let mut conn = self.manager.clone();
        conn.get(key).await.map_err(conn_err)
    }

    async fn raw_set(&self, key: &str, value: Vec<u8>) -> MascResult<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.set(key, value).await.map_err(conn_err)?;
        Ok(())
    }

    async fn raw_set_if_absent(&self, key: &str, value: Vec<u8>) -> MascResult<bool> {
        let mut conn = self.manager.clone();
        // SET key value NX — the atomic primitive this whole driver's
        // higher-level lock/CAS semantics are built on (§4.2).
        let created: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .query_async(&mut conn)
            .await
            .map_err(conn_err)?;
        Ok(created.is_some())
    }

    async fn raw_delete(&self, key: &str) -> MascResult<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.del(key).await.map_err(conn_err)?;
        Ok(())
    }

    async fn raw_exists(&self, key: &str) -> MascResult<bool> {
        let mut conn = self.manager.clone();
        conn.exists(key).await.map_err(conn_err)
    }

    async fn raw_list_keys(&self, prefix: &str) -> MascResult<Vec<String>> {
        let mut conn = self.manager.clone();
        let pattern = format!("{prefix}*");
        let mut keys: Vec<String> = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next_cursor, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(200)
                .query_async(&mut conn)
                .await
                .map_err(conn_err)?;
            keys.extend(batch);
            if next_cursor == 0 {
                break;
            }
            cursor = next_cursor;
        }
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn raw_get_all(&self, prefix: &str) -> MascResult<Vec<(String, Vec<u8>)>> {
        let keys = self.raw_list_keys(prefix).await?;
        let mut pairs = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.raw_get(&key).await? {
                pairs.push((key, value));
            }
        }
        Ok(pairs)
    }

    async fn health_check(&self) -> HealthStatus {
        let start = Instant::now();
        let mut conn = self.manager.clone();
        let result: redis::RedisResult<String> = redis::cmd("PING").query_async(&mut conn).await;
        HealthStatus {
            healthy: result.is_ok(),
            latency_ms: start.elapsed().as_secs_f64() * 1000.0,
            detail: result.err().map(|e| e.to_string()),
        }
    }

    fn driver_name(&self) -> &'static str {
        "redis"
    }
}
