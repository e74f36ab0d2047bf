//! Tool backends the agent layers call through.
//!
//! The executor reaches its tools over the out-of-process channel; the
//! dispatcher uses an in-process registry with a read-only policy. Both are
//! presented to the loops through one trait.

use async_trait::async_trait;
use std::sync::Arc;

use opsforge_provider::ToolSpec;
use opsforge_tools::channel::ToolChannel;
use opsforge_tools::policy::ToolPolicy;
use opsforge_tools::registry::ToolRegistry;
use opsforge_tools::{to_specs, ToolResult};

#[async_trait]
pub trait ToolBackend: Send + Sync {
    /// Tool definitions to expose to the model.
    fn specs(&self) -> Vec<ToolSpec>;

    /// Execute one tool call.
    async fn call(&self, name: &str, args: serde_json::Value) -> ToolResult;
}

/// In-process registry backend (dispatcher's read-only set).
pub struct RegistryBackend {
    registry: Arc<ToolRegistry>,
    policy: ToolPolicy,
}

impl RegistryBackend {
    pub fn new(registry: Arc<ToolRegistry>, policy: ToolPolicy) -> Self {
        Self { registry, policy }
    }
}

#[async_trait]
impl ToolBackend for RegistryBackend {
    fn specs(&self) -> Vec<ToolSpec> {
        to_specs(&self.registry.get_filtered(&self.policy))
    }

    async fn call(&self, name: &str, args: serde_json::Value) -> ToolResult {
        if !self.policy.allows(name) {
            return ToolResult::error(format!("tool '{name}' denied by policy"));
        }
        self.registry.execute(name, args).await
    }
}

/// Out-of-process channel backend (executor sessions).
pub struct ChannelBackend {
    channel: ToolChannel,
}

impl ChannelBackend {
    pub fn new(channel: ToolChannel) -> Self {
        Self { channel }
    }

    pub fn into_channel(self) -> ToolChannel {
        self.channel
    }
}

#[async_trait]
impl ToolBackend for ChannelBackend {
    fn specs(&self) -> Vec<ToolSpec> {
        self.channel.tool_specs().to_vec()
    }

    async fn call(&self, name: &str, args: serde_json::Value) -> ToolResult {
        self.channel.call(name, args).await
    }
}
