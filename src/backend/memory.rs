//! In-process memory driver: `DashMap` + map-insert-if-absent CAS.
//!
//! Grounded on the teacher's pervasive use of `dashmap::DashMap` for
//! concurrent maps in `enterprise::cache::lock` and
//! `enterprise::ratelimit::distributed`.

use std::time::Instant;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::MascResult;

use super::{HealthStatus, RawStore};

/// The in-memory storage driver. Data does not survive process exit.
pub struct MemoryDriver {
    map: DashMap<String, Vec<u8>>,
}

impl MemoryDriver {
    /// An empty in-memory store.
    pub fn new() -> Self {
        Self { map: DashMap::new() }
    }
}

impl Default for MemoryDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RawStore for MemoryDriver {
    async fn raw_get(&self, key: &str) -> MascResult<Option<Vec<u8>>> {
        Ok(self.map.get(key).map(|entry| entry.value().clone()))
    }

    async fn raw_set(&self, key: &str, value: Vec<u8>) -> MascResult<()> {
        self.map.insert(key.to_string(), value);
        Ok(())
    }

    async fn raw_set_if_absent(&self, key: &str, value: Vec<u8>) -> MascResult<bool> {
        match self.map.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(false),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(value);
                Ok(true)
            }
        }
    }

    async fn raw_delete(&self, key: &str) -> MascResult<()> {
        self.map.remove(key);
        Ok(())
    }

    async fn raw_exists(&self, key: &str) -> MascResult<bool> {
        Ok(self.map.contains_key(key))
    }

    async fn raw_list_keys(&self, prefix: &str) -> MascResult<Vec<String>> {
        Ok(self
            .map
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect())
    }

    async fn raw_get_all(&self, prefix: &str) -> MascResult<Vec<(String, Vec<u8>)>> {
        Ok(self
            .map
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect())
    }

    async fn health_check(&self) -> HealthStatus {
        let start = Instant::now();
        let probe_key = "__masc_health_probe__";
        self.map.insert(probe_key.to_string(), vec![1]);
        let ok = self.map.contains_key(probe_key);
        self.map.remove(probe_key);
        HealthStatus {
            healthy: ok,
            latency_ms: start.elapsed().as_secs_f64() * 1000.0,
            detail: None,
        }
    }

    fn driver_name(&self) -> &'static str {
        "memory"
    }
}
