//! Tool: write_file — create or overwrite a file inside the tool root.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::validate::{FieldType, ToolSchema};
use crate::{Tool, ToolCategory, ToolResult};

pub struct WriteFileTool {
    root: PathBuf,
}

impl WriteFileTool {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file, creating parent directories as needed. \
         Overwrites the file if it already exists."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::FileWrite
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new()
            .field("path", FieldType::String, true, "Path relative to the workspace root.")
            .field("content", FieldType::String, true, "Full file content to write.")
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let path = input["path"].as_str().unwrap_or_default();
        let content = input["content"].as_str().unwrap_or_default();

        let full = match super::resolve(&self.root, path) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };

        if let Some(parent) = full.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return ToolResult::error(format!("failed to create parent dirs: {e}"));
            }
        }

        match tokio::fs::write(&full, content).await {
            Ok(()) => ToolResult::success(format!("wrote {} bytes to {}", content.len(), path)),
            Err(e) => ToolResult::error(format!("failed to write '{}': {}", path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_and_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let tool = WriteFileTool::new(dir.path().to_path_buf());

        let result = tool
            .execute(serde_json::json!({"path": "src/new/mod.rs", "content": "pub fn f() {}"}))
            .await;
        assert!(!result.is_error);
        let written = std::fs::read_to_string(dir.path().join("src/new/mod.rs")).unwrap();
        assert_eq!(written, "pub fn f() {}");
    }

    #[tokio::test]
    async fn overwrites_existing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "old").unwrap();
        let tool = WriteFileTool::new(dir.path().to_path_buf());

        tool.execute(serde_json::json!({"path": "f.txt", "content": "new"}))
            .await;
        assert_eq!(std::fs::read_to_string(dir.path().join("f.txt")).unwrap(), "new");
    }

    #[tokio::test]
    async fn escape_attempt_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let tool = WriteFileTool::new(dir.path().to_path_buf());
        let result = tool
            .execute(serde_json::json!({"path": "/etc/hosts", "content": "x"}))
            .await;
        assert!(result.is_error);
    }
}
