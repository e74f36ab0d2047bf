//! Sandbox lifecycle: create, finalize, cleanup.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::git::{self, run_git, run_git_checked};
use crate::install;
use crate::pr::{self, GitHost, PrRequest};
use crate::{Result, Sandbox, SandboxError};

/// Max chars of the slug derived from a task title.
const SLUG_MAX: usize = 30;

#[derive(Debug, Clone)]
pub struct SandboxManagerConfig {
    /// Directory worktrees are created under.
    pub base_dir: PathBuf,
    /// Target repository the worktrees branch from.
    pub project_path: PathBuf,
    /// Explicit dependency install command (overrides lockfile detection).
    pub setup_command: Option<String>,
    pub auto_create_pr: bool,
    pub pr_draft: bool,
    pub github_token: Option<String>,
    pub gitlab_token: Option<String>,
}

pub struct SandboxManager {
    config: SandboxManagerConfig,
}

impl SandboxManager {
    pub fn new(config: SandboxManagerConfig) -> Self {
        Self { config }
    }

    /// Create an isolated worktree + branch for a task.
    ///
    /// Dependency bootstrap and submodule init are best-effort; a failure
    /// there leaves a usable (if dependency-less) tree.
    pub async fn create(&self, task_id: &str, title: &str) -> Result<Sandbox> {
        let project = &self.config.project_path;
        let base_branch = git::current_branch(project).await?;

        let short_id: String = task_id.chars().take(8).collect();
        let slug = kebab_slug(title, SLUG_MAX);
        let branch_name = if slug.is_empty() {
            format!("devops-bot/task-{short_id}")
        } else {
            format!("devops-bot/task-{short_id}-{slug}")
        };
        let worktree_path = self.config.base_dir.join(task_id);

        std::fs::create_dir_all(&self.config.base_dir)?;

        // A stale worktree at this path (crashed previous run) is removed
        // hard: git first, filesystem fallback, then prune metadata.
        if worktree_path.exists() {
            warn!(path = %worktree_path.display(), "stale sandbox path found, removing");
            self.remove_worktree(&worktree_path).await;
        }

        let worktree_str = worktree_path.to_string_lossy().to_string();
        let out = run_git(
            project,
            &["worktree", "add", "-b", &branch_name, &worktree_str, "HEAD"],
        )
        .await?;
        if !out.success {
            return Err(SandboxError::Worktree(format!(
                "worktree add failed: {}",
                out.stderr.trim()
            )));
        }

        install::bootstrap(&worktree_path, self.config.setup_command.as_deref()).await;

        let submodules = detect_submodules(&worktree_path);
        if !submodules.is_empty() {
            info!(count = submodules.len(), "initialising submodules");
            let out = run_git(
                &worktree_path,
                &["submodule", "update", "--init", "--recursive"],
            )
            .await?;
            if !out.success {
                warn!(stderr = %out.stderr.trim(), "submodule init failed (continuing)");
            }
        }

        info!(task_id, branch = %branch_name, path = %worktree_path.display(), "sandbox created");

        Ok(Sandbox {
            task_id: task_id.to_string(),
            branch_name,
            base_branch,
            worktree_path,
            submodules,
        })
    }

    /// Push the sandbox branch and open a PR/MR. Returns the PR URL when one
    /// was created; `Ok(None)` when there was nothing to push or the host is
    /// unknown.
    pub async fn finalize(
        &self,
        sandbox: &Sandbox,
        title: &str,
        description: &str,
    ) -> Result<Option<String>> {
        let dir = &sandbox.worktree_path;

        if !git::has_commits_over(dir, &sandbox.base_branch).await? {
            info!(task_id = %sandbox.task_id, "no commits produced, skipping push");
            return Ok(None);
        }

        let remote = git::remote_url(dir).await.unwrap_or_default();
        let host = pr::detect_host(&remote);
        let req = PrRequest {
            title: title.to_string(),
            description: description.to_string(),
            base_branch: sandbox.base_branch.clone(),
            branch: sandbox.branch_name.clone(),
            draft: self.config.pr_draft,
        };

        if !self.config.auto_create_pr {
            run_git_checked(
                dir,
                &["push", "--set-upstream", "origin", &sandbox.branch_name],
            )
            .await?;
            return Ok(None);
        }

        match host {
            GitHost::GitLab {
                host: gl_host,
                project,
            } => self.finalize_gitlab(dir, &gl_host, &project, &req).await,
            GitHost::GitHub { host, owner, repo } => {
                self.finalize_github(dir, &host, &owner, &repo, &req).await
            }
            GitHost::Unknown => {
                run_git_checked(
                    dir,
                    &["push", "--set-upstream", "origin", &sandbox.branch_name],
                )
                .await?;
                info!(remote = %remote, "unknown git host, pushed without PR");
                Ok(None)
            }
        }
    }

    async fn finalize_gitlab(
        &self,
        dir: &Path,
        host: &str,
        project: &str,
        req: &PrRequest,
    ) -> Result<Option<String>> {
        // Primary path: server-side MR creation via push options.
        let args = pr::gitlab_push_args(req);
        let arg_refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
        let out = run_git(dir, &arg_refs).await?;

        if !out.success {
            return Err(SandboxError::Push(out.stderr.trim().to_string()));
        }
        if let Some(url) = pr::parse_gitlab_mr_url(&out.combined()) {
            return Ok(Some(url));
        }

        // Push succeeded but no MR URL came back — REST, then glab.
        if let Some(token) = &self.config.gitlab_token {
            if let Some(url) = pr::create_gitlab_mr_rest(host, project, token, req).await {
                return Ok(Some(url));
            }
        }

        let out = git::run_command(
            dir,
            "glab",
            &[
                "mr",
                "create",
                "--title",
                &req.title,
                "--description",
                &req.description,
                "--target-branch",
                &req.base_branch,
                "--yes",
            ],
            std::time::Duration::from_secs(60),
        )
        .await;
        if let Ok(out) = out {
            if let Some(url) = pr::parse_cli_url(&out.combined()) {
                return Ok(Some(url));
            }
        }

        warn!("GitLab MR creation fell through every path; branch is pushed");
        Ok(None)
    }

    async fn finalize_github(
        &self,
        dir: &Path,
        host: &str,
        owner: &str,
        repo: &str,
        req: &PrRequest,
    ) -> Result<Option<String>> {
        run_git_checked(dir, &["push", "--set-upstream", "origin", &req.branch]).await?;

        if let Some(token) = &self.config.github_token {
            if let Some(url) = pr::create_github_pr_rest(host, owner, repo, token, req).await {
                return Ok(Some(url));
            }
        }

        let mut args: Vec<&str> = vec![
            "pr",
            "create",
            "--title",
            &req.title,
            "--body",
            &req.description,
            "--base",
            &req.base_branch,
        ];
        if req.draft {
            args.push("--draft");
        }
        let out = git::run_command(dir, "gh", &args, std::time::Duration::from_secs(60)).await;
        if let Ok(out) = out {
            if let Some(url) = pr::parse_cli_url(&out.combined()) {
                return Ok(Some(url));
            }
        }

        warn!("GitHub PR creation fell through every path; branch is pushed");
        Ok(None)
    }

    /// Remove the worktree and its metadata. Safe to call twice.
    pub async fn cleanup(&self, sandbox: &Sandbox) {
        self.remove_worktree(&sandbox.worktree_path).await;
        info!(task_id = %sandbox.task_id, "sandbox cleaned up");
    }

    async fn remove_worktree(&self, path: &Path) {
        let project = &self.config.project_path;
        let path_str = path.to_string_lossy().to_string();

        let removed = run_git(project, &["worktree", "remove", "--force", &path_str])
            .await
            .map(|o| o.success)
            .unwrap_or(false);

        if !removed && path.exists() {
            if let Err(e) = std::fs::remove_dir_all(path) {
                warn!(path = %path_str, error = %e, "filesystem worktree removal failed");
            }
        }

        if let Err(e) = run_git(project, &["worktree", "prune"]).await {
            warn!(error = %e, "worktree prune failed");
        }
    }
}

/// Kebab-case slug of a task title, capped at `max` chars. Alphanumeric runs
/// (including CJK) become dash-joined lowercase segments.
pub fn kebab_slug(title: &str, max: usize) -> String {
    let mut slug = String::new();
    let mut last_dash = true;
    for c in title.chars() {
        if slug.chars().count() >= max {
            break;
        }
        if c.is_alphanumeric() {
            for lc in c.to_lowercase() {
                slug.push(lc);
            }
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    let trimmed: String = slug.trim_matches('-').chars().take(max).collect();
    trimmed
}

/// Submodule paths declared in `.gitmodules`, if any.
fn detect_submodules(worktree: &Path) -> Vec<String> {
    let gitmodules = worktree.join(".gitmodules");
    let Ok(raw) = std::fs::read_to_string(gitmodules) else {
        return Vec::new();
    };
    raw.lines()
        .filter_map(|line| {
            let line = line.trim();
            line.strip_prefix("path")
                .and_then(|rest| rest.trim_start().strip_prefix('='))
                .map(|path| path.trim().to_string())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_kebab_cases_ascii() {
        assert_eq!(kebab_slug("Fix login timeout", 30), "fix-login-timeout");
        assert_eq!(kebab_slug("  Fix: login / timeout!! ", 30), "fix-login-timeout");
    }

    #[test]
    fn slug_caps_length() {
        let slug = kebab_slug("a very long title that keeps going and going", 10);
        assert!(slug.chars().count() <= 10);
        assert!(!slug.ends_with('-'));
    }

    #[test]
    fn slug_keeps_cjk() {
        let slug = kebab_slug("修复登录超时", 30);
        assert_eq!(slug, "修复登录超时");
    }

    #[test]
    fn slug_mixed_cjk_and_ascii() {
        assert_eq!(kebab_slug("修复 login bug", 30), "修复-login-bug");
    }

    #[test]
    fn slug_empty_title() {
        assert_eq!(kebab_slug("!!!", 30), "");
    }

    #[test]
    fn detects_submodule_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(".gitmodules"),
            "[submodule \"libs/common\"]\n\tpath = libs/common\n\turl = git@example.com:libs/common.git\n",
        )
        .unwrap();
        assert_eq!(detect_submodules(dir.path()), vec!["libs/common".to_string()]);
    }

    #[test]
    fn no_gitmodules_means_no_submodules() {
        let dir = tempfile::tempdir().unwrap();
        assert!(detect_submodules(dir.path()).is_empty());
    }

    async fn git_available() -> bool {
        git::run_command(
            Path::new("."),
            "git",
            &["--version"],
            std::time::Duration::from_secs(5),
        )
        .await
        .map(|o| o.success)
        .unwrap_or(false)
    }

    async fn init_repo(dir: &Path) {
        run_git(dir, &["init", "-b", "main"]).await.unwrap();
        run_git(dir, &["config", "user.email", "test@example.com"])
            .await
            .unwrap();
        run_git(dir, &["config", "user.name", "Test"]).await.unwrap();
        std::fs::write(dir.join("README.md"), "hello\n").unwrap();
        run_git(dir, &["add", "."]).await.unwrap();
        run_git(dir, &["commit", "-m", "init"]).await.unwrap();
    }

    #[tokio::test]
    async fn create_and_cleanup_round_trip() {
        if !git_available().await {
            return;
        }

        let project = tempfile::tempdir().unwrap();
        let sandboxes = tempfile::tempdir().unwrap();
        init_repo(project.path()).await;

        let manager = SandboxManager::new(SandboxManagerConfig {
            base_dir: sandboxes.path().to_path_buf(),
            project_path: project.path().to_path_buf(),
            setup_command: None,
            auto_create_pr: true,
            pr_draft: false,
            github_token: None,
            gitlab_token: None,
        });

        let sandbox = manager.create("task-123", "Fix login timeout").await.unwrap();
        assert!(sandbox.worktree_path.exists());
        assert_eq!(sandbox.base_branch, "main");
        assert!(sandbox.branch_name.starts_with("devops-bot/task-task-123"));
        assert!(sandbox.branch_name.contains("fix-login"));

        // No commits over base -> finalize is a no-op.
        let url = manager.finalize(&sandbox, "Fix login timeout", "").await.unwrap();
        assert!(url.is_none());

        manager.cleanup(&sandbox).await;
        assert!(!sandbox.worktree_path.exists());
        // Second cleanup is safe.
        manager.cleanup(&sandbox).await;
    }

    #[tokio::test]
    async fn create_replaces_stale_path() {
        if !git_available().await {
            return;
        }

        let project = tempfile::tempdir().unwrap();
        let sandboxes = tempfile::tempdir().unwrap();
        init_repo(project.path()).await;

        // Simulate a leftover directory from a crashed run.
        std::fs::create_dir_all(sandboxes.path().join("task-9")).unwrap();
        std::fs::write(sandboxes.path().join("task-9/leftover.txt"), "stale").unwrap();

        let manager = SandboxManager::new(SandboxManagerConfig {
            base_dir: sandboxes.path().to_path_buf(),
            project_path: project.path().to_path_buf(),
            setup_command: None,
            auto_create_pr: true,
            pr_draft: false,
            github_token: None,
            gitlab_token: None,
        });

        let sandbox = manager.create("task-9", "retry").await.unwrap();
        assert!(sandbox.worktree_path.join("README.md").exists());
        assert!(!sandbox.worktree_path.join("leftover.txt").exists());
        manager.cleanup(&sandbox).await;
    }
}
