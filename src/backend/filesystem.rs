//! Filesystem driver: one file per key under a base directory, with
//! per-operation advisory `flock` and atomic rename-into-place.
//!
//! Grounded on the pack's file-locking idiom for advisory locks (the
//! retrieval pack's Rust examples reach for the `fs4` crate rather than
//! hand-rolled `libc::flock` calls); `set_if_absent` uses `O_EXCL`
//! (`create_new`) the way the teacher's `database::connection` treats
//! exclusive resource creation as the one atomic primitive worth
//! trusting the OS for.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use fs4::tokio::AsyncFileExt;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{MascError, MascResult};
use crate::validation::validate_safe_path;

use super::{HealthStatus, RawStore};

/// The filesystem storage driver.
pub struct FilesystemDriver {
    base: PathBuf,
}

fn io_err(err: std::io::Error) -> MascError {
    MascError::IoError {
        detail: err.to_string(),
    }
}

impl FilesystemDriver {
    /// Open (creating if necessary) a filesystem store rooted at `base_path`.
    pub fn new(base_path: &Path) -> MascResult<Self> {
        std::fs::create_dir_all(base_path).map_err(io_err)?;
        Ok(Self {
            base: base_path.to_path_buf(),
        })
    }

    /// Map a backend key (`:`-separated) onto a relative file path.
    fn key_path(&self, key: &str) -> MascResult<PathBuf> {
        let relative: PathBuf = key.split(':').collect::<Vec<_>>().join("/").into();
        let relative_str = relative.to_string_lossy().to_string();
        validate_safe_path(&relative_str)?;
        Ok(self.base.join(relative).with_extension("masc"))
    }

    fn path_to_key(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.base).ok()?;
        let without_ext = relative.with_extension("");
        let parts: Vec<String> = without_ext
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect();
        Some(parts.join(":"))
    }

    async fn walk(&self, dir: &Path, out: &mut Vec<PathBuf>) -> MascResult<()> {
        if !dir.exists() {
            return Ok(());
        }
        let mut entries = fs::read_dir(dir).await.map_err(io_err)?;
        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            let path = entry.path();
            let file_type = entry.file_type().await.map_err(io_err)?;
            if file_type.is_dir() {
                Box::pin(self.walk(&path, out)).await?;
            } else if path.extension().is_some_and(|ext| ext == "masc") {
                out.push(path);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RawStore for FilesystemDriver {
    async fn raw_get(&self, key: &str) -> MascResult<Option<Vec<u8>>> {
        let path = self.key_path(key)?;
        let mut file = match File::open(&path).await {
            Ok(f) => f,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(io_err(err)),
        };
        file.lock_shared().map_err(io_err)?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).await.map_err(io_err)?;
        AsyncFileExt::unlock(&file).map_err(io_err)?;
        Ok(Some(buf))
    }

    async fn raw_set(&self, key: &str, value: Vec<u8>) -> MascResult<()> {
        let path = self.key_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let tmp_path = path.with_extension("masc.tmp");
        let mut tmp = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)
            .await
            .map_err(io_err)?;
        tmp.lock_exclusive().map_err(io_err)?;
        tmp.write_all(&value).await.map_err(io_err)?;
        tmp.sync_all().await.map_err(io_err)?;
        AsyncFileExt::unlock(&tmp).map_err(io_err)?;
        fs::rename(&tmp_path, &path).await.map_err(io_err)?;
        Ok(())
    }

    async fn raw_set_if_absent(&self, key: &str, value: Vec<u8>) -> MascResult<bool> {
        let path = self.key_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path).await {
            Ok(f) => f,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => return Ok(false),
            Err(err) => return Err(io_err(err)),
        };
        file.lock_exclusive().map_err(io_err)?;
        file.write_all(&value).await.map_err(io_err)?;
        file.sync_all().await.map_err(io_err)?;
        AsyncFileExt::unlock(&file).map_err(io_err)?;
        Ok(true)
    }

    async fn raw_delete(&self, key: &str) -> MascResult<()> {
        let path = self.key_path(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(_) if !path.exists() => Ok(()),
            Err(err) => Err(io_err(err)),
        }
    }

    async fn raw_exists(&self, key: &str) -> MascResult<bool> {
        Ok(self.key_path(key)?.exists())
    }

    async fn raw_list_keys(&self, prefix: &str) -> MascResult<Vec<String>> {
        let mut paths = Vec::new();
        self.walk(&self.base, &mut paths).await?;
        let mut keys: Vec<String> = paths
            .iter()
            .filter_map(|p| self.path_to_key(p))
            .filter(|k| k.starts_with(prefix))
            .collect();
        keys.sort();
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
        let probe = "__masc_health_probe__";
        let result = self.raw_set(probe, vec![1]).await.and(Ok(()));
        let _ = self.raw_delete(probe).await;
        HealthStatus {
            healthy: result.is_ok(),
            latency_ms: start.elapsed().as_secs_f64() * 1000.0,
            detail: result.err().map(|e: MascError| e.to_string()),
        }
    }

    fn driver_name(&self) -> &'static str {
        "filesystem"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let driver = FilesystemDriver::new(dir.path()).unwrap();
        driver.raw_set("agents:alpha", b"hi".to_vec()).await.unwrap();
        assert_eq!(driver.raw_get("agents:alpha").await.unwrap(), Some(b"hi".to_vec()));
    }

    #[tokio::test]
    async fn set_if_absent_rejects_existing_file() {
        let dir = tempdir().unwrap();
        let driver = FilesystemDriver::new(dir.path()).unwrap();
        assert!(driver.raw_set_if_absent("k", vec![1]).await.unwrap());
        assert!(!driver.raw_set_if_absent("k", vec![2]).await.unwrap());
    }

    #[tokio::test]
    async fn colon_segments_map_to_nested_directories() {
        let dir = tempdir().unwrap();
        let driver = FilesystemDriver::new(dir.path()).unwrap();
        driver.raw_set("tasks:sub:1", b"x".to_vec()).await.unwrap();
        assert!(dir.path().join("tasks").join("sub").join("1.masc").exists());
    }

    #[tokio::test]
    async fn list_keys_recurses_and_sorts() {
        let dir = tempdir().unwrap();
        let driver = FilesystemDriver::new(dir.path()).unwrap();
        driver.raw_set("agents:beta", b"".to_vec()).await.unwrap();
        driver.raw_set("agents:alpha", b"".to_vec()).await.unwrap();
        let keys = driver.raw_list_keys("agents:").await.unwrap();
        assert_eq!(keys, vec!["agents:alpha".to_string(), "agents:beta".to_string()]);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = tempdir().unwrap();
        let driver = FilesystemDriver::new(dir.path()).unwrap();
        driver.raw_delete("nope").await.unwrap();
    }
}
