//! Per-task isolation: a dedicated git worktree and branch, dependency
//! bootstrap, submodule init, and finalization (push + PR/MR creation).

pub mod git;
pub mod install;
pub mod manager;
pub mod pr;

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("git command failed: {0}")]
    Git(String),

    #[error("worktree setup failed: {0}")]
    Worktree(String),

    #[error("push failed: {0}")]
    Push(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("command timed out after {secs}s")]
    Timeout { secs: u64 },
}

pub type Result<T> = std::result::Result<T, SandboxError>;

/// A live sandbox: one worktree + branch dedicated to a single task.
#[derive(Debug, Clone)]
pub struct Sandbox {
    pub task_id: String,
    pub branch_name: String,
    pub base_branch: String,
    pub worktree_path: PathBuf,
    pub submodules: Vec<String>,
}
