//! Workspace isolation for parallel workers
//!
//! Three strategies keep concurrent workers' filesystem effects from
//! colliding: a git worktree per worker, coarse per-path advisory locks
//! over a shared directory, or no isolation for read-only analysis.
//! The chosen strategy is a plan-wide property.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, warn};

/// How parallel workers share the filesystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum WorkspaceStrategy {
    /// Dedicated git worktree and branch per worker
    GitWorktree,
    /// Shared directory with coarse per-path advisory locks
    FileLocking,
    /// Read-only analysis; no isolation needed
    #[default]
    InMemory,
}

/// Errors from workspace management
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("failed to create worktree: {0}")]
    CreateFailed(String),

    #[error("failed to remove worktree: {0}")]
    RemoveFailed(String),

    #[error("git command failed: {0}")]
    Git(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Workspace manager configuration
#[derive(Debug, Clone)]
pub struct WorkspaceConfig {
    pub strategy: WorkspaceStrategy,
    /// Base directory for created worktrees
    pub base_dir: PathBuf,
    /// Repository root (GitWorktree) or shared directory (FileLocking)
    pub root: PathBuf,
    pub branch_prefix: String,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            strategy: WorkspaceStrategy::InMemory,
            base_dir: std::env::temp_dir().join("deskpilot").join("worktrees"),
            root: PathBuf::from("."),
            branch_prefix: "deskpilot".to_string(),
        }
    }
}

/// A worker's hold on its workspace; released through the manager
pub struct WorkspaceLease {
    pub worker_id: String,
    /// Directory the worker should operate in; None for in-memory work
    pub path: Option<PathBuf>,
    /// Branch backing a git worktree
    pub branch: Option<String>,
    /// Advisory lock guard (FileLocking)
    _lock: Option<OwnedMutexGuard<()>>,
}

/// Hands out and reclaims worker workspaces
pub struct WorkspaceManager {
    config: WorkspaceConfig,
    /// Per-path advisory locks for the FileLocking strategy
    locks: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl WorkspaceManager {
    pub fn new(config: WorkspaceConfig) -> Self {
        Self {
            config,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn strategy(&self) -> WorkspaceStrategy {
        self.config.strategy
    }

    /// Acquire a workspace for one worker
    ///
    /// `scope` narrows the FileLocking lock to a subpath; workers with
    /// disjoint scopes run concurrently, workers sharing a scope serialise.
    pub async fn acquire(&self, worker_id: &str, scope: Option<&str>) -> Result<WorkspaceLease, WorkspaceError> {
        match self.config.strategy {
            WorkspaceStrategy::InMemory => Ok(WorkspaceLease {
                worker_id: worker_id.to_string(),
                path: Some(self.config.root.clone()),
                branch: None,
                _lock: None,
            }),
            WorkspaceStrategy::FileLocking => {
                let lock_path = match scope {
                    Some(scope) => self.config.root.join(scope),
                    None => self.config.root.clone(),
                };
                let lock = {
                    let mut locks = self.locks.lock().expect("workspace lock poisoned");
                    locks
                        .entry(lock_path.clone())
                        .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                        .clone()
                };
                debug!(worker_id, path = %lock_path.display(), "acquiring advisory lock");
                let guard = lock.lock_owned().await;
                Ok(WorkspaceLease {
                    worker_id: worker_id.to_string(),
                    path: Some(lock_path),
                    branch: None,
                    _lock: Some(guard),
                })
            }
            WorkspaceStrategy::GitWorktree => self.create_worktree(worker_id).await,
        }
    }

    /// Release a lease; worktrees are removed, locks drop with the lease
    pub async fn release(&self, lease: WorkspaceLease) -> Result<(), WorkspaceError> {
        if self.config.strategy == WorkspaceStrategy::GitWorktree {
            if let Some(path) = &lease.path {
                self.remove_worktree(path).await?;
            }
        }
        Ok(())
    }

    async fn create_worktree(&self, worker_id: &str) -> Result<WorkspaceLease, WorkspaceError> {
        tokio::fs::create_dir_all(&self.config.base_dir).await?;

        let path = self.config.base_dir.join(worker_id);
        let branch = format!("{}/{}", self.config.branch_prefix, worker_id);

        let output = Command::new("git")
            .args([
                "worktree",
                "add",
                path.to_string_lossy().as_ref(),
                "-b",
                &branch,
            ])
            .current_dir(&self.config.root)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(WorkspaceError::CreateFailed(stderr));
        }

        debug!(worker_id, path = %path.display(), %branch, "created worktree");
        Ok(WorkspaceLease {
            worker_id: worker_id.to_string(),
            path: Some(path),
            branch: Some(branch),
            _lock: None,
        })
    }

    async fn remove_worktree(&self, path: &PathBuf) -> Result<(), WorkspaceError> {
        let output = Command::new("git")
            .args(["worktree", "remove", "--force", path.to_string_lossy().as_ref()])
            .current_dir(&self.config.root)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            warn!(path = %path.display(), %stderr, "worktree removal failed");
            return Err(WorkspaceError::RemoveFailed(stderr));
        }
        Ok(())
    }
}
