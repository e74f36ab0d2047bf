//! Builtin tools, all scoped to a root directory (the sandbox worktree for
//! executor sessions, the target project for the dispatcher's read-only set).

pub mod delete_file;
pub mod execute_command;
pub mod list_files;
pub mod read_file;
pub mod search_files;
pub mod write_file;

use std::path::{Component, Path, PathBuf};

use crate::registry::ToolRegistry;

/// Build a registry with the full builtin tool set rooted at `root`.
pub fn standard_registry(root: impl Into<PathBuf>) -> ToolRegistry {
    let root = root.into();
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(read_file::ReadFileTool::new(root.clone())));
    registry.register(Box::new(write_file::WriteFileTool::new(root.clone())));
    registry.register(Box::new(list_files::ListFilesTool::new(root.clone())));
    registry.register(Box::new(search_files::SearchFilesTool::new(root.clone())));
    registry.register(Box::new(delete_file::DeleteFileTool::new(root.clone())));
    registry.register(Box::new(execute_command::ExecuteCommandTool::new(root)));
    registry
}

/// Resolve a model-supplied relative path against the tool root.
/// Absolute paths and `..` traversal are rejected — tools never reach
/// outside their sandbox.
pub(crate) fn resolve(root: &Path, path: &str) -> Result<PathBuf, String> {
    let candidate = Path::new(path);
    if candidate.is_absolute() {
        return Err(format!("absolute paths are not allowed: {path}"));
    }
    for component in candidate.components() {
        if matches!(component, Component::ParentDir) {
            return Err(format!("path may not contain '..': {path}"));
        }
    }
    Ok(root.join(candidate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_joins_relative_paths() {
        let root = Path::new("/work");
        assert_eq!(
            resolve(root, "src/main.rs").unwrap(),
            PathBuf::from("/work/src/main.rs")
        );
    }

    #[test]
    fn resolve_rejects_absolute() {
        assert!(resolve(Path::new("/work"), "/etc/passwd").is_err());
    }

    #[test]
    fn resolve_rejects_traversal() {
        assert!(resolve(Path::new("/work"), "../secrets").is_err());
        assert!(resolve(Path::new("/work"), "src/../../x").is_err());
    }

    #[test]
    fn standard_registry_has_all_builtins() {
        let registry = standard_registry("/tmp");
        let names: Vec<&str> = registry.get_all().iter().map(|t| t.name()).collect();
        assert_eq!(
            names,
            vec![
                "read_file",
                "write_file",
                "list_files",
                "search_files",
                "delete_file",
                "execute_command"
            ]
        );
    }
}
