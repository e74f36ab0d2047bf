//! PR/MR creation across git hosts.
//!
//! GitLab gets the merge request via push options with REST and `glab`
//! fallbacks; GitHub pushes plainly then goes REST with a `gh` fallback.
//! Unknown hosts only push.

use regex::Regex;
use tracing::{debug, warn};

/// GitLab caps push-option values; longer descriptions go through REST only.
pub const GITLAB_DESC_PUSH_LIMIT: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitHost {
    GitLab { host: String, project: String },
    GitHub { host: String, owner: String, repo: String },
    Unknown,
}

/// Parse a remote URL (ssh `git@host:path.git` or `http(s)://host/path.git`)
/// into `(host, path)`.
pub fn parse_remote(url: &str) -> Option<(String, String)> {
    let url = url.trim();

    if let Some(rest) = url.strip_prefix("git@") {
        let (host, path) = rest.split_once(':')?;
        return Some((host.to_string(), trim_git_path(path)));
    }

    for scheme in ["https://", "http://", "ssh://git@", "ssh://"] {
        if let Some(rest) = url.strip_prefix(scheme) {
            let (host, path) = rest.split_once('/')?;
            return Some((host.to_string(), trim_git_path(path)));
        }
    }

    None
}

fn trim_git_path(path: &str) -> String {
    path.trim_matches('/')
        .strip_suffix(".git")
        .unwrap_or(path.trim_matches('/'))
        .to_string()
}

/// Classify the remote by host name.
pub fn detect_host(remote: &str) -> GitHost {
    let Some((host, path)) = parse_remote(remote) else {
        return GitHost::Unknown;
    };

    if host.contains("gitlab") {
        return GitHost::GitLab {
            host,
            project: path,
        };
    }
    if host.contains("github") {
        let mut parts = path.splitn(2, '/');
        let owner = parts.next().unwrap_or_default().to_string();
        let repo = parts.next().unwrap_or_default().to_string();
        if owner.is_empty() || repo.is_empty() {
            return GitHost::Unknown;
        }
        return GitHost::GitHub { host, owner, repo };
    }
    GitHost::Unknown
}

#[derive(Debug, Clone)]
pub struct PrRequest {
    pub title: String,
    pub description: String,
    pub base_branch: String,
    pub branch: String,
    pub draft: bool,
}

/// Arguments for a GitLab push that creates the MR server-side.
pub fn gitlab_push_args(req: &PrRequest) -> Vec<String> {
    let mut args = vec![
        "push".to_string(),
        "--set-upstream".to_string(),
        "origin".to_string(),
        req.branch.clone(),
        "-o".to_string(),
        "merge_request.create".to_string(),
        "-o".to_string(),
        format!("merge_request.target={}", req.base_branch),
        "-o".to_string(),
        format!("merge_request.title={}", req.title),
    ];
    if req.draft {
        args.push("-o".to_string());
        args.push("merge_request.draft".to_string());
    }
    if !req.description.is_empty() && req.description.len() <= GITLAB_DESC_PUSH_LIMIT {
        args.push("-o".to_string());
        args.push(format!("merge_request.description={}", req.description));
    }
    args
}

/// Pull the MR URL GitLab prints in the push response.
pub fn parse_gitlab_mr_url(push_output: &str) -> Option<String> {
    let re = Regex::new(r"https://\S+/-/merge_requests/\d+").ok()?;
    re.find(push_output).map(|m| m.as_str().to_string())
}

/// Create a GitLab MR through the REST API (`GITLAB_TOKEN`).
pub async fn create_gitlab_mr_rest(
    host: &str,
    project: &str,
    token: &str,
    req: &PrRequest,
) -> Option<String> {
    let url = format!(
        "https://{}/api/v4/projects/{}/merge_requests",
        host,
        urlencoding::encode(project)
    );
    let title = if req.draft {
        format!("Draft: {}", req.title)
    } else {
        req.title.clone()
    };

    debug!(url = %url, "creating GitLab MR via REST");
    let resp = reqwest::Client::new()
        .post(&url)
        .header("PRIVATE-TOKEN", token)
        .json(&serde_json::json!({
            "source_branch": req.branch,
            "target_branch": req.base_branch,
            "title": title,
            "description": req.description,
        }))
        .send()
        .await
        .ok()?;

    if !resp.status().is_success() {
        warn!(status = resp.status().as_u16(), "GitLab MR REST call failed");
        return None;
    }
    let body: serde_json::Value = resp.json().await.ok()?;
    body.get("web_url")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

/// API base for a GitHub host: dotcom or Enterprise (`/api/v3`).
pub fn github_api_base(host: &str) -> String {
    if host == "github.com" {
        "https://api.github.com".to_string()
    } else {
        format!("https://{host}/api/v3")
    }
}

/// Create a GitHub PR through the REST API (`GITHUB_TOKEN`).
pub async fn create_github_pr_rest(
    host: &str,
    owner: &str,
    repo: &str,
    token: &str,
    req: &PrRequest,
) -> Option<String> {
    let url = format!("{}/repos/{}/{}/pulls", github_api_base(host), owner, repo);

    debug!(url = %url, "creating GitHub PR via REST");
    let resp = reqwest::Client::new()
        .post(&url)
        .bearer_auth(token)
        .header("user-agent", "opsforge")
        .header("accept", "application/vnd.github+json")
        .json(&serde_json::json!({
            "title": req.title,
            "body": req.description,
            "head": req.branch,
            "base": req.base_branch,
            "draft": req.draft,
        }))
        .send()
        .await
        .ok()?;

    if !resp.status().is_success() {
        warn!(status = resp.status().as_u16(), "GitHub PR REST call failed");
        return None;
    }
    let body: serde_json::Value = resp.json().await.ok()?;
    body.get("html_url")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

/// Pull the first PR/MR-looking URL out of CLI output (`gh`/`glab` print it).
pub fn parse_cli_url(output: &str) -> Option<String> {
    let re = Regex::new(r"https://\S+/(pull|-/merge_requests)/\d+").ok()?;
    re.find(output).map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ssh_remote() {
        let (host, path) = parse_remote("git@gitlab.company.com:team/app.git").unwrap();
        assert_eq!(host, "gitlab.company.com");
        assert_eq!(path, "team/app");
    }

    #[test]
    fn parses_https_remote() {
        let (host, path) = parse_remote("https://github.com/acme/widgets.git").unwrap();
        assert_eq!(host, "github.com");
        assert_eq!(path, "acme/widgets");
    }

    #[test]
    fn detects_gitlab_on_custom_host() {
        let host = detect_host("git@gitlab.company.com:team/app.git");
        assert_eq!(
            host,
            GitHost::GitLab {
                host: "gitlab.company.com".into(),
                project: "team/app".into()
            }
        );
    }

    #[test]
    fn detects_github_owner_repo() {
        let host = detect_host("https://github.com/acme/widgets.git");
        assert_eq!(
            host,
            GitHost::GitHub {
                host: "github.com".into(),
                owner: "acme".into(),
                repo: "widgets".into()
            }
        );
    }

    #[test]
    fn unknown_host_detected() {
        assert_eq!(detect_host("git@bitbucket.org:team/app.git"), GitHost::Unknown);
        assert_eq!(detect_host("not a url"), GitHost::Unknown);
    }

    #[test]
    fn gitlab_push_args_carry_mr_options() {
        let req = PrRequest {
            title: "Fix login".into(),
            description: "raise timeout".into(),
            base_branch: "main".into(),
            branch: "devops-bot/task-abc-fix".into(),
            draft: false,
        };
        let args = gitlab_push_args(&req);
        assert!(args.contains(&"merge_request.create".to_string()));
        assert!(args.contains(&"merge_request.target=main".to_string()));
        assert!(args.contains(&"merge_request.title=Fix login".to_string()));
        assert!(args.contains(&"merge_request.description=raise timeout".to_string()));
        assert!(!args.contains(&"merge_request.draft".to_string()));
    }

    #[test]
    fn gitlab_push_args_draft_and_long_description() {
        let req = PrRequest {
            title: "t".into(),
            description: "d".repeat(GITLAB_DESC_PUSH_LIMIT + 1),
            base_branch: "main".into(),
            branch: "b".into(),
            draft: true,
        };
        let args = gitlab_push_args(&req);
        assert!(args.contains(&"merge_request.draft".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("merge_request.description=")));
    }

    #[test]
    fn mr_url_parsed_from_push_output() {
        let output = "remote:\nremote: To create a merge request visit:\nremote:   https://gitlab.company.com/team/app/-/merge_requests/42\nremote:";
        assert_eq!(
            parse_gitlab_mr_url(output).unwrap(),
            "https://gitlab.company.com/team/app/-/merge_requests/42"
        );
    }

    #[test]
    fn github_enterprise_api_base() {
        assert_eq!(github_api_base("github.com"), "https://api.github.com");
        assert_eq!(
            github_api_base("github.acme.com"),
            "https://github.acme.com/api/v3"
        );
    }

    #[test]
    fn cli_url_parse_handles_both_hosts() {
        assert_eq!(
            parse_cli_url("created https://github.com/a/b/pull/7 done").unwrap(),
            "https://github.com/a/b/pull/7"
        );
        assert_eq!(
            parse_cli_url("https://gitlab.com/a/b/-/merge_requests/9").unwrap(),
            "https://gitlab.com/a/b/-/merge_requests/9"
        );
    }
}
