//! The coordination state machine layered on [`crate::backend::Backend`]
//! (§4.3). Each mutating op validates inputs, acquires the relevant
//! named lock with a bounded retry, reads-transforms-writes the
//! affected document, and releases the lock on every exit path.
//!
//! Grounded structurally on `enterprise::cache::lock::DistributedMutex`
//! for the lease-lock-with-reclaim idiom, adapted to run atop
//! `Backend::acquire_lock` rather than an in-process map, and on
//! `enterprise::collaboration::session::CollaborationSession` for the
//! read-modify-write-under-one-lock shape of a shared document.

pub mod agent;
pub mod audit;
pub mod lock;
pub mod message;
pub mod task;
pub mod worktree;
pub mod zombie;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::backend::Backend;
use crate::error::{MascError, MascResult};
use crate::validation::{validate_agent_id, validate_task_id};

pub use agent::{Agent, AgentStatus};
pub use message::Message;
pub use task::{Task, TaskStatus};

/// How many times a mutating op retries its named lock before giving
/// up with `FileLocked` (§4.3).
const LOCK_RETRY_ATTEMPTS: u32 = 20;
/// Delay between named-lock retries.
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(50);

const STATE_KEY: &str = "state";
const AGENTS_LOCK: &str = "room:agents";
const BACKLOG_LOCK: &str = "room:backlog";

/// The coordination state machine for one project/cluster.
pub struct Room {
    backend: Arc<Backend>,
    base_path: PathBuf,
    lock_ttl: Duration,
    zombie_threshold: Duration,
}

impl Room {
    /// A room layered on `backend`, rooted at `base_path` for worktree
    /// resolution, using `lock_ttl` as the default file-lock lease.
    pub fn new(backend: Arc<Backend>, base_path: impl Into<PathBuf>, lock_ttl: Duration) -> Self {
        Self {
            backend,
            base_path: base_path.into(),
            lock_ttl,
            zombie_threshold: zombie::DEFAULT_ZOMBIE_THRESHOLD,
        }
    }

    /// Override the zombie-sweep staleness threshold (default 300s).
    pub fn with_zombie_threshold(mut self, threshold: Duration) -> Self {
        self.zombie_threshold = threshold;
        self
    }

    async fn with_named_lock<F, Fut, T>(&self, lock_name: &str, f: F) -> MascResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = MascResult<T>>,
    {
        let owner = format!("room-op-{}", uuid::Uuid::new_v4());
        let mut attempt = 0;
        loop {
            if self.backend.acquire_lock(lock_name, &owner, self.lock_ttl).await? {
                break;
            }
            attempt += 1;
            if attempt >= LOCK_RETRY_ATTEMPTS {
                let by = self
                    .backend
                    .lock_holder(lock_name)
                    .await?
                    .unwrap_or_else(|| "unknown".to_string());
                return Err(MascError::FileLocked {
                    file: lock_name.to_string(),
                    by,
                });
            }
            tokio::time::sleep(LOCK_RETRY_DELAY).await;
        }

        let result = f().await;
        let _ = self.backend.release_lock(lock_name, &owner).await;
        result
    }

    /// Idempotent room initialization: creates `state.json`-equivalent
    /// bookkeeping and seeds an empty backlog if absent. Re-init
    /// preserves any existing history.
    pub async fn init(&self) -> MascResult<()> {
        if !self.backend.exists(STATE_KEY).await? {
            let state = serde_json::json!({ "initialized_at": Utc::now() });
            self.backend.set(STATE_KEY, &serde_json::to_vec(&state)?).await?;
        }
        if !self.backend.exists(task::BACKLOG_KEY).await? {
            let empty: task::Backlog = HashMap::new();
            self.backend
                .set(task::BACKLOG_KEY, &serde_json::to_vec(&empty)?)
                .await?;
        }
        Ok(())
    }

    /// `join(agent)`: upsert `agents:<name>`, emit a broadcast.
    pub async fn join(&self, name: &str, capabilities: Vec<String>) -> MascResult<()> {
        validate_agent_id(name)?;
        self.with_named_lock(AGENTS_LOCK, || async {
            let agent = Agent::new(name, capabilities);
            self.backend
                .set(&Agent::key(name), &serde_json::to_vec(&agent)?)
                .await
        })
        .await?;
        self.broadcast("system", &format!("{name} joined the room"), None).await?;
        Ok(())
    }

    /// `leave(agent)`: delete `agents:<name>`, emit a broadcast.
    pub async fn leave(&self, name: &str) -> MascResult<()> {
        validate_agent_id(name)?;
        self.with_named_lock(AGENTS_LOCK, || async { self.backend.delete(&Agent::key(name)).await })
            .await?;
        self.broadcast("system", &format!("{name} left the room"), None).await?;
        Ok(())
    }

    /// Heartbeat: bump `last_seen` for `name`.
    pub async fn heartbeat(&self, name: &str) -> MascResult<()> {
        validate_agent_id(name)?;
        self.with_named_lock(AGENTS_LOCK, || async {
            let key = Agent::key(name);
            let bytes = self
                .backend
                .get(&key)
                .await?
                .ok_or_else(|| MascError::NotFound { resource: "agent", id: name.to_string() })?;
            let mut agent: Agent = serde_json::from_slice(&bytes)?;
            agent.last_seen = Utc::now();
            self.backend.set(&key, &serde_json::to_vec(&agent)?).await
        })
        .await
    }

    async fn read_backlog(&self) -> MascResult<task::Backlog> {
        let bytes = self
            .backend
            .get(task::BACKLOG_KEY)
            .await?
            .ok_or(MascError::NotInitialized)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn write_backlog(&self, backlog: &task::Backlog) -> MascResult<()> {
        self.backend
            .set(task::BACKLOG_KEY, &serde_json::to_vec(backlog)?)
            .await
    }

    async fn read_archive(&self) -> MascResult<task::Archive> {
        Ok(match self.backend.get(task::ARCHIVE_KEY).await? {
            Some(bytes) => serde_json::from_slice(&bytes)?,
            None => Vec::new(),
        })
    }

    async fn append_archive(&self, task: &Task) -> MascResult<()> {
        let mut archive = self.read_archive().await?;
        archive.push(task.clone());
        self.backend
            .set(task::ARCHIVE_KEY, &serde_json::to_vec(&archive)?)
            .await
    }

    /// Applies `f` to the live task, then — if it lands in a terminal
    /// state (`Done`/`Cancelled`) — moves it out of the live backlog
    /// and appends it to the archive document (§3 supplement), all
    /// under the same backlog lock so the move is atomic.
    async fn mutate_task<F>(&self, task_id: &str, f: F) -> MascResult<Task>
    where
        F: FnOnce(&mut Task) -> MascResult<()>,
    {
        validate_task_id(task_id)?;
        self.with_named_lock(BACKLOG_LOCK, || async {
            let mut backlog = self.read_backlog().await?;
            let task = backlog
                .get_mut(task_id)
                .ok_or_else(|| MascError::TaskNotFound(task_id.to_string()))?;
            f(task)?;
            let result = task.clone();

            if result.is_terminal() {
                backlog.remove(task_id);
                self.append_archive(&result).await?;
            }
            self.write_backlog(&backlog).await?;
            Ok(result)
        })
        .await
    }

    /// Record a just-created worktree path on `task_id`, taking the
    /// same backlog lock `mutate_task` uses. Standalone (not a method
    /// on an owned `Room`) so `worktree_create`'s compensating-rollback
    /// closure can call it without constructing a throwaway `Room`.
    async fn record_worktree_path(
        backend: &Backend,
        lock_ttl: Duration,
        task_id: &str,
        path: PathBuf,
    ) -> MascResult<()> {
        let owner = format!("room-op-{}", uuid::Uuid::new_v4());
        let mut attempt = 0;
        loop {
            if backend.acquire_lock(BACKLOG_LOCK, &owner, lock_ttl).await? {
                break;
            }
            attempt += 1;
            if attempt >= LOCK_RETRY_ATTEMPTS {
                let by = backend
                    .lock_holder(BACKLOG_LOCK)
                    .await?
                    .unwrap_or_else(|| "unknown".to_string());
                return Err(MascError::FileLocked {
                    file: BACKLOG_LOCK.to_string(),
                    by,
                });
            }
            tokio::time::sleep(LOCK_RETRY_DELAY).await;
        }

        let result = async {
            let bytes = backend
                .get(task::BACKLOG_KEY)
                .await?
                .ok_or(MascError::NotInitialized)?;
            let mut backlog: task::Backlog = serde_json::from_slice(&bytes)?;
            let task = backlog
                .get_mut(task_id)
                .ok_or_else(|| MascError::TaskNotFound(task_id.to_string()))?;
            task.worktree = Some(path.to_string_lossy().to_string());
            backend.set(task::BACKLOG_KEY, &serde_json::to_vec(&backlog)?).await
        }
        .await;

        let _ = backend.release_lock(BACKLOG_LOCK, &owner).await;
        result
    }

    /// `add_task`: insert a fresh `Todo` task into the backlog.
    pub async fn add_task(&self, id: &str, title: &str, priority: i32) -> MascResult<Task> {
        validate_task_id(id)?;
        self.with_named_lock(BACKLOG_LOCK, || async {
            let mut backlog = self.read_backlog().await?;
            if backlog.contains_key(id) {
                return Err(MascError::AlreadyExists {
                    resource: "task",
                    id: id.to_string(),
                });
            }
            let task = Task::new(id, title, priority);
            backlog.insert(id.to_string(), task.clone());
            self.write_backlog(&backlog).await?;
            Ok(task)
        })
        .await
    }

    /// `claim(T, X)`: `AlreadyClaimed{by}` if non-Todo and not already
    /// owned by `by`.
    pub async fn claim(&self, task_id: &str, by: &str) -> MascResult<Task> {
        validate_agent_id(by)?;
        self.mutate_task(task_id, |task| task.claim(by)).await
    }

    /// `release(T, X)`: return a Claimed/InProgress task to Todo.
    pub async fn release(&self, task_id: &str, by: &str) -> MascResult<Task> {
        validate_agent_id(by)?;
        self.mutate_task(task_id, |task| task.release(by)).await
    }

    /// `transition(T, X)`: Claimed → InProgress.
    pub async fn start(&self, task_id: &str, by: &str) -> MascResult<Task> {
        validate_agent_id(by)?;
        self.mutate_task(task_id, |task| task.start(by)).await
    }

    /// `done(T, X)`: requires the caller to be the current owner.
    pub async fn done(&self, task_id: &str, by: &str, notes: &str) -> MascResult<Task> {
        validate_agent_id(by)?;
        self.mutate_task(task_id, |task| task.done(by, notes.to_string())).await
    }

    /// `cancel(T)`: reachable from any non-terminal state.
    pub async fn cancel(&self, task_id: &str) -> MascResult<Task> {
        self.mutate_task(task_id, |task| task.cancel()).await
    }

    /// Every task that has ever reached a terminal state, oldest first.
    pub async fn archived_tasks(&self) -> MascResult<task::Archive> {
        self.read_archive().await
    }

    /// `broadcast`: atomically allocate the next seq, then write
    /// `messages:<seq>`. `mention`, if set, scopes delivery to a
    /// single agent rather than the whole room.
    pub async fn broadcast(
        &self,
        from_agent: &str,
        content: &str,
        mention: Option<&str>,
    ) -> MascResult<u64> {
        let seq = message::allocate_seq(&self.backend).await?;
        let message = Message {
            seq,
            from_agent: from_agent.to_string(),
            content: content.to_string(),
            mention: mention.map(str::to_string),
            ts: Utc::now(),
        };
        self.backend
            .set(&format!("messages:{seq}"), &serde_json::to_vec(&message)?)
            .await?;
        Ok(seq)
    }

    /// `lock(file)`: acquire the advisory file lock at `path` for `owner`.
    pub async fn lock(&self, path: &str, owner: &str) -> MascResult<()> {
        lock::lock_file(&self.backend, path, owner, self.lock_ttl).await
    }

    /// `unlock(file)`: release the advisory file lock, no-op if not owner.
    pub async fn unlock(&self, path: &str, owner: &str) -> MascResult<bool> {
        lock::unlock_file(&self.backend, path, owner).await
    }

    /// `worktree_create(agent, task_id, base_branch)`: materialise a
    /// git worktree and record its path on the task, rolling the
    /// worktree back if the Room write fails.
    pub async fn worktree_create(
        &self,
        agent: &str,
        task_id: &str,
        base_branch: &str,
    ) -> MascResult<PathBuf> {
        let backend = self.backend.clone();
        let task_id_owned = task_id.to_string();
        let lock_ttl = self.lock_ttl;
        worktree::worktree_create(
            &backend,
            &self.base_path,
            agent,
            task_id,
            base_branch,
            move |path| {
                let backend = backend.clone();
                let task_id = task_id_owned.clone();
                async move { Self::record_worktree_path(&backend, lock_ttl, &task_id, path).await }
            },
        )
        .await
    }

    /// Run one zombie sweep immediately (see [`zombie::sweep`] for the
    /// background-task variant).
    pub async fn sweep_zombies(&self) -> MascResult<Vec<String>> {
        zombie::sweep(&self.backend, self.zombie_threshold).await
    }

    /// Spawn the periodic zombie sweep background task.
    pub fn spawn_zombie_sweep(&self) -> tokio::task::JoinHandle<()> {
        zombie::spawn_periodic(self.backend.clone(), self.zombie_threshold)
    }
}
