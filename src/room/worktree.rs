//! Git worktree bookkeeping (§4.3 `worktree_create`).
//!
//! Resolves the *main* repository root even when invoked from inside
//! an existing worktree, materialises a new worktree on a fresh
//! branch, and — per SPEC_FULL.md's resolution of the worktree
//! partial-failure Open Question — registers a compensating
//! `git worktree remove --force` if the subsequent Room write fails,
//! grounded on `enterprise::database::transaction::SavepointGuard`'s
//! compensating-action-on-failed-unit-of-work pattern.

use std::path::{Path, PathBuf};

use tokio::process::Command;

use crate::backend::Backend;
use crate::error::{MascError, MascResult};
use crate::room::audit::{self, AuditEvent};
use crate::validation::{validate_agent_id, validate_task_id};

fn io_err(err: std::io::Error) -> MascError {
    MascError::IoError {
        detail: err.to_string(),
    }
}

async fn run_git(root: &Path, args: &[&str]) -> MascResult<String> {
    let output = Command::new("git")
        .current_dir(root)
        .args(args)
        .output()
        .await
        .map_err(io_err)?;
    if !output.status.success() {
        return Err(MascError::Other(format!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Walk up from `start`, locating the main repository root by
/// following a `.git` *file* (worktree pointer, `gitdir: <path>`) back
/// to its parent repository, or stopping at a `.git` *directory*.
pub async fn resolve_git_root(start: &Path) -> MascResult<PathBuf> {
    let mut dir = start.to_path_buf();
    loop {
        let git_path = dir.join(".git");
        if git_path.is_dir() {
            return Ok(dir);
        }
        if git_path.is_file() {
            let contents = tokio::fs::read_to_string(&git_path).await.map_err(io_err)?;
            if let Some(gitdir) = contents.trim().strip_prefix("gitdir: ") {
                // A linked worktree's gitdir points at
                // `<main>/.git/worktrees/<name>`; its parent-parent is
                // the main repository root.
                let gitdir_path = dir.join(gitdir);
                if let Some(root) = gitdir_path
                    .ancestors()
                    .find(|p| p.file_name().is_some_and(|n| n == ".git"))
                    .and_then(|git_dir| git_dir.parent())
                {
                    return Ok(root.to_path_buf());
                }
            }
        }
        match dir.parent() {
            Some(parent) => dir = parent.to_path_buf(),
            None => {
                return Err(MascError::Other(format!(
                    "no .git found walking up from {}",
                    start.display()
                )))
            }
        }
    }
}

async fn branch_exists(root: &Path, branch: &str) -> bool {
    run_git(root, &["rev-parse", "--verify", "--quiet", branch])
        .await
        .is_ok()
}

/// Create (idempotently) a worktree for `agent`'s `task_id` at
/// `.worktrees/<agent>-<task_id>` on branch `<agent>/<task_id>`,
/// falling back from `base_branch` to a sibling branch if it is
/// missing locally, then recording the path against the task. Any
/// failure recording the path rolls the worktree back.
pub async fn worktree_create<F, Fut>(
    backend: &Backend,
    base_path: &Path,
    agent: &str,
    task_id: &str,
    base_branch: &str,
    record_on_task: F,
) -> MascResult<PathBuf>
where
    F: FnOnce(PathBuf) -> Fut,
    Fut: std::future::Future<Output = MascResult<()>>,
{
    validate_agent_id(agent)?;
    validate_task_id(task_id)?;

    let git_root = resolve_git_root(base_path).await?;
    let worktree_path = git_root.join(".worktrees").join(format!("{agent}-{task_id}"));
    let branch = format!("{agent}/{task_id}");

    if worktree_path.exists() {
        // Already materialised by a prior call; idempotent no-op on
        // the filesystem side, but the Room write still needs to run
        // in case the prior attempt crashed before recording it.
        record_on_task(worktree_path.clone()).await?;
        return Ok(worktree_path);
    }

    let _ = run_git(&git_root, &["fetch", "origin"]).await;

    let base = if branch_exists(&git_root, base_branch).await {
        base_branch.to_string()
    } else {
        run_git(&git_root, &["symbolic-ref", "--short", "HEAD"])
            .await
            .unwrap_or_else(|_| "main".to_string())
    };

    run_git(
        &git_root,
        &[
            "worktree",
            "add",
            "-b",
            &branch,
            worktree_path.to_str().ok_or_else(|| {
                MascError::InvalidFilePath(worktree_path.display().to_string())
            })?,
            &base,
        ],
    )
    .await?;

    if let Err(err) = record_on_task(worktree_path.clone()).await {
        let _ = run_git(
            &git_root,
            &["worktree", "remove", "--force", worktree_path.to_str().unwrap_or_default()],
        )
        .await;
        audit::record(
            backend,
            AuditEvent::worktree_rolled_back(worktree_path.display().to_string(), err.to_string()),
        )
        .await;
        return Err(err);
    }

    Ok(worktree_path)
}
