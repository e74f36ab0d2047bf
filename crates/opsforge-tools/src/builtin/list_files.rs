//! Tool: list_files — list directory entries inside the tool root.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::validate::{FieldType, ToolSchema};
use crate::{Tool, ToolCategory, ToolResult};

pub struct ListFilesTool {
    root: PathBuf,
}

impl ListFilesTool {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List the entries of a directory. Directories are suffixed with '/'. \
         Defaults to the workspace root when no path is given."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::FileRead
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new().field(
            "path",
            FieldType::String,
            false,
            "Directory path relative to the workspace root (default: '.').",
        )
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let path = input["path"].as_str().unwrap_or(".");
        let full = match super::resolve(&self.root, path) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };

        let mut read_dir = match tokio::fs::read_dir(&full).await {
            Ok(rd) => rd,
            Err(e) => return ToolResult::error(format!("failed to list '{}': {}", path, e)),
        };

        let mut entries: Vec<String> = Vec::new();
        while let Ok(Some(entry)) = read_dir.next_entry().await {
            let name = entry.file_name().to_string_lossy().to_string();
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            entries.push(if is_dir { format!("{name}/") } else { name });
        }
        entries.sort();

        if entries.is_empty() {
            ToolResult::success("(empty directory)")
        } else {
            ToolResult::success(entries.join("\n"))
        }
    }
}
