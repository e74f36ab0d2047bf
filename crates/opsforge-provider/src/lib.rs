//! Provider-agnostic AI client: content-block message types, the
//! [`AiProvider`] trait with Anthropic and OpenAI adapters, retry with
//! backoff, and embedding providers for the memory engine.

pub mod anthropic;
pub mod embedding;
pub mod openai;
pub mod provider;
pub mod retry;
pub mod types;

pub use provider::{AiProvider, ErrorKind, ProviderError};
pub use types::{ChatMessage, ContentBlock, MessageRequest, MessageResponse, MsgRole, StopReason, ToolSpec, Usage};

use std::sync::Arc;

/// Build a provider from config: "anthropic" or "openai".
pub fn build_provider(
    provider: &str,
    api_key: String,
    base_url: Option<String>,
) -> Result<Arc<dyn AiProvider>, opsforge_core::OpsforgeError> {
    match provider {
        "anthropic" => Ok(Arc::new(anthropic::AnthropicProvider::new(api_key, base_url))),
        "openai" => Ok(Arc::new(openai::OpenAiProvider::new(api_key, base_url))),
        other => Err(opsforge_core::OpsforgeError::Config(format!(
            "unknown AI provider: {other}"
        ))),
    }
}
