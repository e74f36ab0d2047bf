//! Tool registry — name-keyed lookup with policy filtering and call metrics.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tracing::{debug, warn};

use crate::policy::ToolPolicy;
use crate::{Tool, ToolCategory, ToolResult};

#[derive(Debug, Default)]
pub struct ToolMetrics {
    pub calls: AtomicU64,
    pub errors: AtomicU64,
    pub total_duration_ms: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
pub struct MetricsSnapshot {
    pub calls: u64,
    pub errors: u64,
    pub total_duration_ms: u64,
}

struct Registered {
    tool: Box<dyn Tool>,
    enabled: bool,
    metrics: ToolMetrics,
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Registered>,
    /// Registration order, for stable listings.
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            warn!(tool = %name, "tool re-registered, replacing previous");
        } else {
            self.order.push(name.clone());
        }
        self.tools.insert(
            name,
            Registered {
                tool,
                enabled: true,
                metrics: ToolMetrics::default(),
            },
        );
    }

    pub fn set_enabled(&mut self, name: &str, enabled: bool) {
        if let Some(reg) = self.tools.get_mut(name) {
            reg.enabled = enabled;
        }
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .get(name)
            .filter(|r| r.enabled)
            .map(|r| r.tool.as_ref())
    }

    /// All enabled tools in registration order.
    pub fn get_all(&self) -> Vec<&dyn Tool> {
        self.order
            .iter()
            .filter_map(|name| self.get(name))
            .collect()
    }

    pub fn get_by_category(&self, category: ToolCategory) -> Vec<&dyn Tool> {
        self.get_all()
            .into_iter()
            .filter(|t| t.category() == category)
            .collect()
    }

    /// Enabled tools the policy admits.
    pub fn get_filtered(&self, policy: &ToolPolicy) -> Vec<&dyn Tool> {
        self.get_all()
            .into_iter()
            .filter(|t| policy.allows(t.name()))
            .collect()
    }

    pub fn metrics(&self, name: &str) -> Option<MetricsSnapshot> {
        self.tools.get(name).map(|r| MetricsSnapshot {
            calls: r.metrics.calls.load(Ordering::Relaxed),
            errors: r.metrics.errors.load(Ordering::Relaxed),
            total_duration_ms: r.metrics.total_duration_ms.load(Ordering::Relaxed),
        })
    }

    /// Validate arguments and execute the named tool, recording metrics.
    pub async fn execute(&self, name: &str, input: serde_json::Value) -> ToolResult {
        let Some(reg) = self.tools.get(name).filter(|r| r.enabled) else {
            return ToolResult::error(format!("unknown tool: {name}"));
        };

        match reg.tool.schema().validate(&input) {
            Ok(warnings) => {
                for warning in warnings {
                    warn!(tool = %name, "{warning}");
                }
            }
            Err(reason) => {
                reg.metrics.calls.fetch_add(1, Ordering::Relaxed);
                reg.metrics.errors.fetch_add(1, Ordering::Relaxed);
                return ToolResult::error(format!("invalid arguments for {name}: {reason}"));
            }
        }

        debug!(tool = %name, "executing tool");
        let started = Instant::now();
        let result = reg.tool.execute(input).await;
        let elapsed = started.elapsed().as_millis() as u64;

        reg.metrics.calls.fetch_add(1, Ordering::Relaxed);
        reg.metrics
            .total_duration_ms
            .fetch_add(elapsed, Ordering::Relaxed);
        if result.is_error {
            reg.metrics.errors.fetch_add(1, Ordering::Relaxed);
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::{FieldType, ToolSchema};
    use async_trait::async_trait;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echo the input back."
        }
        fn category(&self) -> ToolCategory {
            ToolCategory::Skill
        }
        fn schema(&self) -> ToolSchema {
            ToolSchema::new().field("text", FieldType::String, true, "text to echo")
        }
        async fn execute(&self, input: serde_json::Value) -> ToolResult {
            ToolResult::success(input["text"].as_str().unwrap_or_default().to_string())
        }
    }

    fn registry() -> ToolRegistry {
        let mut reg = ToolRegistry::new();
        reg.register(Box::new(EchoTool));
        reg
    }

    #[tokio::test]
    async fn execute_records_metrics() {
        let reg = registry();
        let result = reg.execute("echo", serde_json::json!({"text": "hi"})).await;
        assert!(!result.is_error);
        assert_eq!(result.content, "hi");

        let m = reg.metrics("echo").unwrap();
        assert_eq!(m.calls, 1);
        assert_eq!(m.errors, 0);
    }

    #[tokio::test]
    async fn invalid_arguments_fail_before_execution() {
        let reg = registry();
        let result = reg.execute("echo", serde_json::json!({})).await;
        assert!(result.is_error);
        assert!(result.content.contains("text"));
        assert_eq!(reg.metrics("echo").unwrap().errors, 1);
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error_result() {
        let reg = registry();
        let result = reg.execute("nope", serde_json::json!({})).await;
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn disabled_tools_are_hidden() {
        let mut reg = registry();
        reg.set_enabled("echo", false);
        assert!(reg.get("echo").is_none());
        assert!(reg.get_all().is_empty());
        let result = reg.execute("echo", serde_json::json!({"text": "x"})).await;
        assert!(result.is_error);
    }

    #[test]
    fn filtered_respects_policy() {
        let reg = registry();
        let all = reg.get_filtered(&ToolPolicy::full());
        assert_eq!(all.len(), 1);
        let none = reg.get_filtered(&ToolPolicy {
            allow: vec!["group:shell".into()],
            deny: vec![],
        });
        assert!(none.is_empty());
    }
}
