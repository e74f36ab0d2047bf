//! Tool: search_files — recursively search file contents for a substring.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::validate::{FieldType, ToolSchema};
use crate::{Tool, ToolCategory, ToolResult};

/// Maximum number of matching lines returned.
const MAX_MATCHES: usize = 100;

/// Directories never descended into.
const SKIP_DIRS: &[&str] = &[".git", "node_modules", "target", ".venv"];

pub struct SearchFilesTool {
    root: PathBuf,
}

impl SearchFilesTool {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait]
impl Tool for SearchFilesTool {
    fn name(&self) -> &str {
        "search_files"
    }

    fn description(&self) -> &str {
        "Recursively search file contents for a substring pattern. Returns \
         matching lines in `file:line_number: content` format. Skips binary \
         files, .git, node_modules and target. Returns at most 100 matches."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Search
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new()
            .field("pattern", FieldType::String, true, "Substring to search for (case-sensitive).")
            .field("path", FieldType::String, false, "Directory to search in (default: workspace root).")
            .field("file_pattern", FieldType::String, false, "Optional filename suffix filter, e.g. '.rs'.")
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let pattern = input["pattern"].as_str().unwrap_or_default().to_string();
        let path = input["path"].as_str().unwrap_or(".");
        let file_pattern = input["file_pattern"].as_str().map(|s| s.to_string());

        let full = match super::resolve(&self.root, path) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };
        let root = self.root.clone();

        // The walk is synchronous std::fs; run it off the async thread.
        let output = tokio::task::spawn_blocking(move || {
            let mut matches = Vec::new();
            let mut truncated = false;
            search_dir(
                &full,
                &root,
                &pattern,
                file_pattern.as_deref(),
                &mut matches,
                &mut truncated,
            );
            (matches, truncated)
        })
        .await;

        let (matches, truncated) = match output {
            Ok(pair) => pair,
            Err(e) => return ToolResult::error(format!("search task failed: {e}")),
        };

        if matches.is_empty() {
            return ToolResult::success("No matches found.");
        }

        let mut output = matches.join("\n");
        if truncated {
            output.push_str(&format!("\n\n[truncated at {} matches]", MAX_MATCHES));
        }
        ToolResult::success(output)
    }
}

/// Recursively walk `dir`, collecting substring matches relative to `root`.
fn search_dir(
    dir: &Path,
    root: &Path,
    pattern: &str,
    file_pattern: Option<&str>,
    matches: &mut Vec<String>,
    truncated: &mut bool,
) {
    let read_dir = match std::fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(_) => return,
    };

    let mut entries: Vec<PathBuf> = read_dir.filter_map(|e| e.ok()).map(|e| e.path()).collect();
    entries.sort();

    for entry in entries {
        if *truncated {
            return;
        }

        let name = entry
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if entry.is_dir() {
            if SKIP_DIRS.contains(&name.as_str()) {
                continue;
            }
            search_dir(&entry, root, pattern, file_pattern, matches, truncated);
        } else if entry.is_file() {
            if let Some(suffix) = file_pattern {
                if !name.ends_with(suffix) {
                    continue;
                }
            }
            // Skip binary files — read_to_string fails on invalid UTF-8.
            let Ok(content) = std::fs::read_to_string(&entry) else {
                continue;
            };
            let display = entry
                .strip_prefix(root)
                .unwrap_or(&entry)
                .to_string_lossy()
                .to_string();
            for (lineno, line) in content.lines().enumerate() {
                if line.contains(pattern) {
                    matches.push(format!("{}:{}: {}", display, lineno + 1, line.trim_end()));
                    if matches.len() >= MAX_MATCHES {
                        *truncated = true;
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn finds_matches_with_locations() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/a.rs"), "fn main() {\n    todo!();\n}\n").unwrap();
        let tool = SearchFilesTool::new(dir.path().to_path_buf());

        let result = tool.execute(serde_json::json!({"pattern": "todo!"})).await;
        assert!(!result.is_error);
        assert!(result.content.contains("src/a.rs:2:"));
    }

    #[tokio::test]
    async fn respects_file_pattern() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "needle\n").unwrap();
        std::fs::write(dir.path().join("a.md"), "needle\n").unwrap();
        let tool = SearchFilesTool::new(dir.path().to_path_buf());

        let result = tool
            .execute(serde_json::json!({"pattern": "needle", "file_pattern": ".rs"}))
            .await;
        assert!(result.content.contains("a.rs"));
        assert!(!result.content.contains("a.md"));
    }

    #[tokio::test]
    async fn skips_git_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join(".git/config"), "needle\n").unwrap();
        let tool = SearchFilesTool::new(dir.path().to_path_buf());

        let result = tool.execute(serde_json::json!({"pattern": "needle"})).await;
        assert_eq!(result.content, "No matches found.");
    }

    #[tokio::test]
    async fn caps_match_count() {
        let dir = tempfile::tempdir().unwrap();
        let many = "hit\n".repeat(250);
        std::fs::write(dir.path().join("big.txt"), many).unwrap();
        let tool = SearchFilesTool::new(dir.path().to_path_buf());

        let result = tool.execute(serde_json::json!({"pattern": "hit"})).await;
        assert!(result.content.contains("[truncated at 100 matches]"));
    }
}
