//! Git subprocess helper.

use std::path::Path;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use crate::{Result, SandboxError};

/// Default timeout for git commands. Pushes and clones can be slow over the
/// network; local operations finish well within this.
const GIT_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone)]
pub struct CmdOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
}

impl CmdOutput {
    /// Combined stdout + stderr (push option responses arrive on stderr).
    pub fn combined(&self) -> String {
        format!("{}\n{}", self.stdout, self.stderr)
    }
}

/// Run `git <args>` in `dir` and capture the output.
pub async fn run_git(dir: &Path, args: &[&str]) -> Result<CmdOutput> {
    run_command(dir, "git", args, GIT_TIMEOUT).await
}

/// Run `git <args>`, failing on a non-zero exit.
pub async fn run_git_checked(dir: &Path, args: &[&str]) -> Result<CmdOutput> {
    let out = run_git(dir, args).await?;
    if !out.success {
        return Err(SandboxError::Git(format!(
            "git {} failed: {}",
            args.join(" "),
            out.stderr.trim()
        )));
    }
    Ok(out)
}

/// Run an arbitrary command with a timeout.
pub async fn run_command(
    dir: &Path,
    program: &str,
    args: &[&str],
    timeout: Duration,
) -> Result<CmdOutput> {
    debug!(program, ?args, dir = %dir.display(), "running command");

    let child = Command::new(program)
        .args(args)
        .current_dir(dir)
        .kill_on_drop(true)
        .output();

    let output = tokio::time::timeout(timeout, child)
        .await
        .map_err(|_| SandboxError::Timeout {
            secs: timeout.as_secs(),
        })??;

    Ok(CmdOutput {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        success: output.status.success(),
    })
}

/// Name of the branch currently checked out in `dir`.
pub async fn current_branch(dir: &Path) -> Result<String> {
    let out = run_git_checked(dir, &["rev-parse", "--abbrev-ref", "HEAD"]).await?;
    Ok(out.stdout.trim().to_string())
}

/// URL of the `origin` remote, if any.
pub async fn remote_url(dir: &Path) -> Option<String> {
    let out = run_git(dir, &["remote", "get-url", "origin"]).await.ok()?;
    if out.success {
        Some(out.stdout.trim().to_string())
    } else {
        None
    }
}

/// Whether `branch` has commits not on `base`.
pub async fn has_commits_over(dir: &Path, base: &str) -> Result<bool> {
    let range = format!("{base}..HEAD");
    let out = run_git_checked(dir, &["log", "--oneline", &range]).await?;
    Ok(!out.stdout.trim().is_empty())
}
