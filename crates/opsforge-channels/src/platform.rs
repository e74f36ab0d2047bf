use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use opsforge_core::types::ImMessage;

use crate::error::ChannelError;

/// Card payload: markdown body with an optional header line.
#[derive(Debug, Clone)]
pub struct CardContent {
    pub markdown: String,
    pub header: Option<String>,
}

impl CardContent {
    pub fn new(markdown: impl Into<String>) -> Self {
        Self {
            markdown: markdown.into(),
            header: None,
        }
    }

    pub fn with_header(mut self, header: impl Into<String>) -> Self {
        self.header = Some(header.into());
        self
    }
}

/// Inbound delivery callbacks. `on_message` fires for debounced bot-mentions;
/// `on_passive_message` for everything else worth logging.
#[derive(Clone)]
pub struct MessageHandlers {
    pub on_message: Arc<dyn Fn(ImMessage) + Send + Sync>,
    pub on_passive_message: Arc<dyn Fn(ImMessage) + Send + Sync>,
}

/// Common interface implemented by every chat platform adapter.
///
/// Implementations must be `Send + Sync`; sends take `&self` so a connected
/// adapter can be driven from multiple tasks.
#[async_trait]
pub trait ImPlatform: Send + Sync {
    /// Stable lowercase identifier ("feishu", "slack").
    fn name(&self) -> &str;

    /// Register inbound handlers and start receiving events.
    async fn connect(&self, handlers: MessageHandlers) -> Result<(), ChannelError>;

    /// Send plain text. Returns the created message id when the platform
    /// reports one.
    async fn send_text(
        &self,
        chat_id: &str,
        text: &str,
        reply_to: Option<&str>,
    ) -> Result<Option<String>, ChannelError>;

    /// Send a card. Returns the created message id when available.
    async fn send_card(
        &self,
        chat_id: &str,
        card: &CardContent,
        reply_to: Option<&str>,
    ) -> Result<Option<String>, ChannelError>;

    /// Update a previously sent card in place.
    async fn update_card(&self, message_id: &str, card: &CardContent) -> Result<bool, ChannelError>;

    /// The bot's own user id on this platform (used for mention detection).
    fn bot_id(&self) -> String;
}

/// Retry a platform send up to 3 times with short backoff, then absorb the
/// failure (chat delivery is never allowed to take a task down).
pub async fn send_with_retry<F, Fut, T>(op: F) -> Option<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, ChannelError>>,
{
    let mut delay = Duration::from_millis(500);
    for attempt in 1..=3u32 {
        match op().await {
            Ok(value) => return Some(value),
            Err(e) if attempt < 3 => {
                tracing::warn!(attempt, error = %e, "platform send failed, retrying");
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(e) => {
                tracing::warn!(error = %e, "platform send failed after retries, dropping");
                return None;
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn send_with_retry_returns_first_success() {
        let calls = AtomicU32::new(0);
        let result = send_with_retry(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, ChannelError>(42) }
        })
        .await;
        assert_eq!(result, Some(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn send_with_retry_absorbs_after_three() {
        let calls = std::sync::Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let result: Option<u32> = send_with_retry(move || {
            calls2.fetch_add(1, Ordering::SeqCst);
            async {
                Err(ChannelError::Api {
                    platform: "test".into(),
                    message: "down".into(),
                })
            }
        })
        .await;
        assert!(result.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
