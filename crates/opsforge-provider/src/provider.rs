use async_trait::async_trait;
use std::time::Duration;

use crate::types::{MessageRequest, MessageResponse};

/// Common interface for all AI providers (Anthropic, OpenAI).
#[async_trait]
pub trait AiProvider: Send + Sync {
    /// Provider name for logging and error messages.
    fn name(&self) -> &str;

    /// Send one non-streaming message request and wait for the full response.
    async fn create_message(&self, req: &MessageRequest) -> Result<MessageResponse, ProviderError>;
}

/// Whether an error is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rate limits, overload, 5xx, network drops. Retryable.
    Transient,
    /// Auth, invalid request, 4xx (except 429). Not retryable.
    Permanent,
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl ProviderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProviderError::Http(_) | ProviderError::RateLimited { .. } => ErrorKind::Transient,
            ProviderError::Api { status, .. } => {
                if *status == 429 || *status >= 500 {
                    ErrorKind::Transient
                } else {
                    ErrorKind::Permanent
                }
            }
            ProviderError::Parse(_) | ProviderError::Cancelled => ErrorKind::Permanent,
        }
    }

    /// Context-window overflow is recovered locally by the executor with an
    /// aggressive trim instead of a retry.
    pub fn is_context_overflow(&self) -> bool {
        match self {
            ProviderError::Api { message, .. } => {
                let lower = message.to_lowercase();
                lower.contains("too long") || lower.contains("maximum")
            }
            _ => false,
        }
    }

    /// Retry-After hint carried by rate-limit errors.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ProviderError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Parse a `Retry-After` header value: either delta-seconds or an HTTP-date.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let when = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let delta = when.with_timezone(&chrono::Utc) - chrono::Utc::now();
    delta.to_std().ok()
}
