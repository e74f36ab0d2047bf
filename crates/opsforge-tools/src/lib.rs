//! Tool system: the [`Tool`] trait, a registry with policy filtering and
//! per-tool metrics, the builtin file/search/shell tools, and the JSON-RPC
//! stdio channel that carries tools to the executor.

pub mod builtin;
pub mod channel;
pub mod policy;
pub mod registry;
pub mod serve;
pub mod validate;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use opsforge_provider::ToolSpec;

/// Broad grouping used by policies (`group:<category>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolCategory {
    FileRead,
    FileWrite,
    Search,
    Shell,
    Skill,
}

impl ToolCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolCategory::FileRead => "file-read",
            ToolCategory::FileWrite => "file-write",
            ToolCategory::Search => "search",
            ToolCategory::Shell => "shell",
            ToolCategory::Skill => "skill",
        }
    }
}

/// Result of executing a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Text content returned to the model.
    pub content: String,
    /// Whether the tool execution failed.
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: message.into(),
            is_error: true,
        }
    }
}

/// Trait that all tools implement.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name for this tool (e.g. "read_file").
    fn name(&self) -> &str;
    /// Human-readable description of what this tool does.
    fn description(&self) -> &str;
    /// Policy category.
    fn category(&self) -> ToolCategory;
    /// Semantic parameter schema, validated before execution.
    fn schema(&self) -> validate::ToolSchema;
    /// Execute the tool with the given input.
    async fn execute(&self, input: serde_json::Value) -> ToolResult;
}

/// Convert a slice of tools to API-level tool definitions.
pub fn to_specs(tools: &[&dyn Tool]) -> Vec<ToolSpec> {
    tools
        .iter()
        .map(|t| ToolSpec {
            name: t.name().to_string(),
            description: t.description().to_string(),
            input_schema: t.schema().to_json_schema(),
        })
        .collect()
}
