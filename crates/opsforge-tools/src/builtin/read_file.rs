//! Tool: read_file — read a file inside the tool root.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::validate::{FieldType, ToolSchema};
use crate::{Tool, ToolCategory, ToolResult};

pub struct ReadFileTool {
    root: PathBuf,
}

impl ReadFileTool {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file. Optionally limit to a line range with \
         `offset` (1-based first line) and `limit` (number of lines)."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::FileRead
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new()
            .field("path", FieldType::String, true, "Path relative to the workspace root.")
            .field("offset", FieldType::Integer, false, "1-based line number to start from.")
            .field("limit", FieldType::Integer, false, "Maximum number of lines to return.")
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let path = input["path"].as_str().unwrap_or_default();
        let full = match super::resolve(&self.root, path) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };

        let content = match tokio::fs::read_to_string(&full).await {
            Ok(c) => c,
            Err(e) => return ToolResult::error(format!("failed to read '{}': {}", path, e)),
        };

        let offset = input["offset"].as_u64().map(|v| v.saturating_sub(1) as usize);
        let limit = input["limit"].as_u64().map(|v| v as usize);

        let result = if offset.is_some() || limit.is_some() {
            let lines: Vec<&str> = content.lines().skip(offset.unwrap_or(0)).collect();
            let lines = match limit {
                Some(n) => &lines[..n.min(lines.len())],
                None => &lines[..],
            };
            lines.join("\n")
        } else {
            content
        };

        ToolResult::success(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_relative_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.txt"), "line1\nline2\nline3\n").unwrap();
        let tool = ReadFileTool::new(dir.path().to_path_buf());

        let result = tool.execute(serde_json::json!({"path": "hello.txt"})).await;
        assert!(!result.is_error);
        assert!(result.content.contains("line2"));
    }

    #[tokio::test]
    async fn line_range_applies() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "a\nb\nc\nd\n").unwrap();
        let tool = ReadFileTool::new(dir.path().to_path_buf());

        let result = tool
            .execute(serde_json::json!({"path": "f.txt", "offset": 2, "limit": 2}))
            .await;
        assert_eq!(result.content, "b\nc");
    }

    #[tokio::test]
    async fn missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ReadFileTool::new(dir.path().to_path_buf());
        let result = tool.execute(serde_json::json!({"path": "nope.txt"})).await;
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn escape_attempt_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ReadFileTool::new(dir.path().to_path_buf());
        let result = tool.execute(serde_json::json!({"path": "../outside"})).await;
        assert!(result.is_error);
        assert!(result.content.contains(".."));
    }
}
