//! Tool: execute_command — one-shot shell command inside the tool root.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::validate::{FieldType, ToolSchema};
use crate::{Tool, ToolCategory, ToolResult};

/// Default timeout for short commands.
const DEFAULT_TIMEOUT_SECS: u64 = 60;
/// Ceiling for long-running commands (builds, installs).
const MAX_TIMEOUT_SECS: u64 = 300;

pub struct ExecuteCommandTool {
    root: PathBuf,
}

impl ExecuteCommandTool {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait]
impl Tool for ExecuteCommandTool {
    fn name(&self) -> &str {
        "execute_command"
    }

    fn description(&self) -> &str {
        "Execute a shell command in the workspace root and return its stdout \
         and stderr. Default timeout is 60 seconds; pass `timeout_secs` for \
         long builds (capped at 300)."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Shell
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new()
            .field("command", FieldType::String, true, "The shell command to execute via sh -c.")
            .field("timeout_secs", FieldType::Integer, false, "Timeout in seconds (max 300).")
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let command = input["command"].as_str().unwrap_or_default();
        let timeout_secs = input["timeout_secs"]
            .as_u64()
            .unwrap_or(DEFAULT_TIMEOUT_SECS)
            .min(MAX_TIMEOUT_SECS);

        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.root)
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(Duration::from_secs(timeout_secs), child).await {
            Ok(Ok(out)) => out,
            Ok(Err(e)) => return ToolResult::error(format!("failed to spawn command: {e}")),
            Err(_) => {
                return ToolResult::error(format!("command timed out after {timeout_secs}s"));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let exit_code = output.status.code().unwrap_or(-1);

        let mut text = String::new();
        if !stdout.is_empty() {
            text.push_str(&stdout);
        }
        if !stderr.is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str("[stderr]\n");
            text.push_str(&stderr);
        }
        if exit_code != 0 {
            text.push_str(&format!("\n[exit code: {exit_code}]"));
        }
        if text.is_empty() {
            text = "(no output)".to_string();
        }

        if exit_code != 0 {
            ToolResult::error(text)
        } else {
            ToolResult::success(text)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ExecuteCommandTool::new(dir.path().to_path_buf());
        let result = tool
            .execute(serde_json::json!({"command": "echo hello"}))
            .await;
        assert!(!result.is_error);
        assert_eq!(result.content.trim(), "hello");
    }

    #[tokio::test]
    async fn runs_in_root_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "").unwrap();
        let tool = ExecuteCommandTool::new(dir.path().to_path_buf());
        let result = tool.execute(serde_json::json!({"command": "ls"})).await;
        assert!(result.content.contains("marker.txt"));
    }

    #[tokio::test]
    async fn nonzero_exit_is_error_with_code() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ExecuteCommandTool::new(dir.path().to_path_buf());
        let result = tool.execute(serde_json::json!({"command": "exit 3"})).await;
        assert!(result.is_error);
        assert!(result.content.contains("[exit code: 3]"));
    }

    #[tokio::test]
    async fn stderr_is_labelled() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ExecuteCommandTool::new(dir.path().to_path_buf());
        let result = tool
            .execute(serde_json::json!({"command": "echo oops >&2"}))
            .await;
        assert!(result.content.contains("[stderr]"));
        assert!(result.content.contains("oops"));
    }

    #[tokio::test]
    async fn timeout_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ExecuteCommandTool::new(dir.path().to_path_buf());
        let started = std::time::Instant::now();
        let result = tool
            .execute(serde_json::json!({"command": "sleep 5", "timeout_secs": 1}))
            .await;
        assert!(result.is_error);
        assert!(result.content.contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}
