//! Tool: delete_file — remove a single file inside the tool root.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::validate::{FieldType, ToolSchema};
use crate::{Tool, ToolCategory, ToolResult};

pub struct DeleteFileTool {
    root: PathBuf,
}

impl DeleteFileTool {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait]
impl Tool for DeleteFileTool {
    fn name(&self) -> &str {
        "delete_file"
    }

    fn description(&self) -> &str {
        "Delete a single file. Directories cannot be deleted with this tool."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::FileWrite
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new().field("path", FieldType::String, true, "Path relative to the workspace root.")
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let path = input["path"].as_str().unwrap_or_default();
        let full = match super::resolve(&self.root, path) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };

        if full.is_dir() {
            return ToolResult::error(format!("'{path}' is a directory"));
        }

        match tokio::fs::remove_file(&full).await {
            Ok(()) => ToolResult::success(format!("deleted {path}")),
            Err(e) => ToolResult::error(format!("failed to delete '{}': {}", path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deletes_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("gone.txt"), "x").unwrap();
        let tool = DeleteFileTool::new(dir.path().to_path_buf());

        let result = tool.execute(serde_json::json!({"path": "gone.txt"})).await;
        assert!(!result.is_error);
        assert!(!dir.path().join("gone.txt").exists());
    }

    #[tokio::test]
    async fn refuses_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let tool = DeleteFileTool::new(dir.path().to_path_buf());

        let result = tool.execute(serde_json::json!({"path": "sub"})).await;
        assert!(result.is_error);
        assert!(dir.path().join("sub").exists());
    }
}
