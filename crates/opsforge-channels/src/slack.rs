//! Slack adapter.
//!
//! Outbound via the Web API (`chat.postMessage` / `chat.update`); inbound
//! Events API payloads are normalized through the same dedup + start-time
//! filters the Feishu adapter applies. Message ids are `channel:ts` pairs
//! since Slack updates need both.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use opsforge_core::config::SlackConfig;
use opsforge_core::types::{ChatId, ImMessage};

use crate::dedup::MessageDedup;
use crate::error::ChannelError;
use crate::feishu::extract_links;
use crate::platform::{CardContent, ImPlatform, MessageHandlers};

const BASE_URL: &str = "https://slack.com/api";

pub struct SlackAdapter {
    config: SlackConfig,
    client: reqwest::Client,
    bot_user_id: Mutex<Option<String>>,
    started_at: chrono::DateTime<chrono::Utc>,
    dedup: MessageDedup,
    handlers: Mutex<Option<MessageHandlers>>,
}

impl SlackAdapter {
    pub fn new(config: SlackConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            bot_user_id: Mutex::new(None),
            started_at: chrono::Utc::now(),
            dedup: MessageDedup::new(),
            handlers: Mutex::new(None),
        }
    }

    async fn api_call(&self, method: &str, body: Value) -> Result<Value, ChannelError> {
        let resp = self
            .client
            .post(format!("{BASE_URL}/{method}"))
            .bearer_auth(&self.config.bot_token)
            .json(&body)
            .send()
            .await?;
        let value: Value = resp.json().await?;
        if !value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false) {
            return Err(ChannelError::Api {
                platform: "slack".into(),
                message: value
                    .get("error")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown")
                    .to_string(),
            });
        }
        Ok(value)
    }

    fn compose_message_id(channel: &str, ts: &str) -> String {
        format!("{channel}:{ts}")
    }

    fn split_message_id(message_id: &str) -> Option<(&str, &str)> {
        message_id.split_once(':')
    }

    fn blocks_for(card: &CardContent) -> Value {
        let mut blocks = Vec::new();
        if let Some(header) = &card.header {
            blocks.push(json!({
                "type": "header",
                "text": { "type": "plain_text", "text": header },
            }));
        }
        blocks.push(json!({
            "type": "section",
            "text": { "type": "mrkdwn", "text": card.markdown },
        }));
        Value::Array(blocks)
    }

    /// Feed one Events API payload (`event_callback`) into the adapter.
    pub fn handle_event(self: &Arc<Self>, payload: &Value) {
        if payload.get("type").and_then(|v| v.as_str()) != Some("event_callback") {
            return;
        }
        let Some(event) = payload.get("event") else {
            return;
        };
        let event_type = event.get("type").and_then(|v| v.as_str()).unwrap_or("");
        if event_type != "app_mention" && event_type != "message" {
            return;
        }
        // Ignore the bot's own messages and edits.
        if event.get("bot_id").is_some() || event.get("subtype").is_some() {
            return;
        }

        let Some(msg) = self.normalize_event(event) else {
            return;
        };

        let event_secs = event
            .get("ts")
            .and_then(|v| v.as_str())
            .and_then(|v| v.split('.').next())
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(i64::MAX);
        if event_secs < self.started_at.timestamp() {
            debug!(message_id = %msg.message_id, "dropping pre-start slack event");
            return;
        }

        if !self.dedup.first_time(&msg.message_id) {
            return;
        }

        let Some(handlers) = self.handlers.lock().unwrap().clone() else {
            warn!("slack event before connect(), dropping");
            return;
        };

        let bot = self.bot_user_id.lock().unwrap().clone();
        let mentioned = event_type == "app_mention"
            || bot
                .map(|id| msg.text.contains(&format!("<@{id}>")))
                .unwrap_or(false);

        if mentioned {
            let mut msg = msg;
            msg.text = strip_slack_mentions(&msg.text);
            (handlers.on_message)(msg);
        } else {
            (handlers.on_passive_message)(msg);
        }
    }

    fn normalize_event(&self, event: &Value) -> Option<ImMessage> {
        let channel = event.get("channel")?.as_str()?.to_string();
        let ts = event.get("ts")?.as_str()?.to_string();
        let user = event
            .get("user")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let text = event.get("text").and_then(|v| v.as_str()).unwrap_or("").to_string();

        let links = extract_links(&text);
        Some(ImMessage {
            chat_id: ChatId::from(channel.clone()),
            message_id: Self::compose_message_id(&channel, &ts),
            sender_id: user.clone(),
            sender_name: user,
            text,
            mentions: Vec::new(),
            attachments: Vec::new(),
            links,
        })
    }
}

#[async_trait]
impl ImPlatform for SlackAdapter {
    fn name(&self) -> &str {
        "slack"
    }

    async fn connect(&self, handlers: MessageHandlers) -> Result<(), ChannelError> {
        let value = self.api_call("auth.test", json!({})).await?;
        if let Some(user_id) = value.get("user_id").and_then(|v| v.as_str()) {
            *self.bot_user_id.lock().unwrap() = Some(user_id.to_string());
        }
        *self.handlers.lock().unwrap() = Some(handlers);
        debug!("slack adapter connected");
        Ok(())
    }

    async fn send_text(
        &self,
        chat_id: &str,
        text: &str,
        reply_to: Option<&str>,
    ) -> Result<Option<String>, ChannelError> {
        let mut body = json!({ "channel": chat_id, "text": text });
        if let Some(parent) = reply_to {
            if let Some((_, ts)) = Self::split_message_id(parent) {
                body["thread_ts"] = json!(ts);
            }
        }
        let value = self.api_call("chat.postMessage", body).await?;
        Ok(value
            .get("ts")
            .and_then(|v| v.as_str())
            .map(|ts| Self::compose_message_id(chat_id, ts)))
    }

    async fn send_card(
        &self,
        chat_id: &str,
        card: &CardContent,
        reply_to: Option<&str>,
    ) -> Result<Option<String>, ChannelError> {
        let mut body = json!({
            "channel": chat_id,
            "text": card.header.clone().unwrap_or_else(|| "update".to_string()),
            "blocks": Self::blocks_for(card),
        });
        if let Some(parent) = reply_to {
            if let Some((_, ts)) = Self::split_message_id(parent) {
                body["thread_ts"] = json!(ts);
            }
        }
        let value = self.api_call("chat.postMessage", body).await?;
        Ok(value
            .get("ts")
            .and_then(|v| v.as_str())
            .map(|ts| Self::compose_message_id(chat_id, ts)))
    }

    async fn update_card(&self, message_id: &str, card: &CardContent) -> Result<bool, ChannelError> {
        let Some((channel, ts)) = Self::split_message_id(message_id) else {
            return Ok(false);
        };
        self.api_call(
            "chat.update",
            json!({
                "channel": channel,
                "ts": ts,
                "text": card.header.clone().unwrap_or_else(|| "update".to_string()),
                "blocks": Self::blocks_for(card),
            }),
        )
        .await?;
        Ok(true)
    }

    fn bot_id(&self) -> String {
        self.bot_user_id.lock().unwrap().clone().unwrap_or_default()
    }
}

/// Remove `<@U...>` mention markup from Slack text.
fn strip_slack_mentions(text: &str) -> String {
    let re = regex::Regex::new(r"<@[A-Z0-9]+>\s*").unwrap();
    re.replace_all(text, "").trim().to_string()
}
