//! Feishu (Lark) adapter.
//!
//! Outbound: tenant-token-authenticated calls to the Open API (text,
//! interactive cards, card updates). Inbound: `im.message.receive_v1`
//! events delivered by the HTTP surface are normalized, filtered by start
//! time, deduplicated, and mention-debounced before reaching the dispatcher.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use tracing::{debug, warn};

use opsforge_core::config::FeishuConfig;
use opsforge_core::types::{Attachment, ChatId, ImMessage, LinkKind, RefLink};

use crate::debounce::MentionDebouncer;
use crate::dedup::MessageDedup;
use crate::error::ChannelError;
use crate::markdown::adapt_markdown_for_card;
use crate::platform::{CardContent, ImPlatform, MessageHandlers};

const BASE_URL: &str = "https://open.feishu.cn";

pub struct FeishuAdapter {
    config: FeishuConfig,
    client: reqwest::Client,
    /// Cached tenant access token with its expiry.
    token: tokio::sync::Mutex<Option<(String, Instant)>>,
    bot_open_id: Mutex<Option<String>>,
    started_at: chrono::DateTime<chrono::Utc>,
    dedup: MessageDedup,
    debouncer: Arc<MentionDebouncer>,
    handlers: Mutex<Option<MessageHandlers>>,
}

impl FeishuAdapter {
    pub fn new(config: FeishuConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            token: tokio::sync::Mutex::new(None),
            bot_open_id: Mutex::new(None),
            started_at: chrono::Utc::now(),
            dedup: MessageDedup::new(),
            debouncer: Arc::new(MentionDebouncer::new()),
            handlers: Mutex::new(None),
        }
    }

    /// Tenant access token, refreshed a minute before expiry.
    async fn tenant_token(&self) -> Result<String, ChannelError> {
        let mut guard = self.token.lock().await;
        if let Some((token, expires)) = guard.as_ref() {
            if *expires > Instant::now() {
                return Ok(token.clone());
            }
        }

        let resp = self
            .client
            .post(format!("{BASE_URL}/open-apis/auth/v3/tenant_access_token/internal"))
            .json(&json!({
                "app_id": self.config.app_id,
                "app_secret": self.config.app_secret,
            }))
            .send()
            .await?;
        let body: Value = resp.json().await?;

        let token = body
            .get("tenant_access_token")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ChannelError::Auth(format!("no tenant token in reply: {body}")))?
            .to_string();
        let expire_secs = body.get("expire").and_then(|v| v.as_u64()).unwrap_or(7200);

        *guard = Some((
            token.clone(),
            Instant::now() + Duration::from_secs(expire_secs.saturating_sub(60)),
        ));
        Ok(token)
    }

    async fn api_post(&self, path: &str, body: Value) -> Result<Value, ChannelError> {
        let token = self.tenant_token().await?;
        let resp = self
            .client
            .post(format!("{BASE_URL}{path}"))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        let value: Value = resp.json().await?;
        if value.get("code").and_then(|c| c.as_i64()).unwrap_or(0) != 0 {
            return Err(ChannelError::Api {
                platform: "feishu".into(),
                message: value.to_string(),
            });
        }
        Ok(value)
    }

    async fn api_patch(&self, path: &str, body: Value) -> Result<Value, ChannelError> {
        let token = self.tenant_token().await?;
        let resp = self
            .client
            .patch(format!("{BASE_URL}{path}"))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        let value: Value = resp.json().await?;
        if value.get("code").and_then(|c| c.as_i64()).unwrap_or(0) != 0 {
            return Err(ChannelError::Api {
                platform: "feishu".into(),
                message: value.to_string(),
            });
        }
        Ok(value)
    }

    fn card_payload(card: &CardContent) -> Value {
        let mut payload = json!({
            "config": { "wide_screen_mode": true },
            "elements": [{ "tag": "markdown", "content": adapt_markdown_for_card(&card.markdown) }],
        });
        if let Some(header) = &card.header {
            payload["header"] = json!({
                "title": { "tag": "plain_text", "content": header },
            });
        }
        payload
    }

    /// Feed one raw event from the webhook route into the adapter.
    /// Unknown or stale events are dropped silently.
    pub fn handle_event(self: &Arc<Self>, payload: &Value) {
        let event_type = payload
            .pointer("/header/event_type")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        if event_type != "im.message.receive_v1" {
            return;
        }

        let Some((msg, mentioned)) = self.normalize_event(payload) else {
            return;
        };

        // Events predating this process are replays from the platform.
        let create_ms = payload
            .pointer("/event/message/create_time")
            .and_then(|v| v.as_str())
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(i64::MAX);
        if create_ms < self.started_at.timestamp_millis() {
            debug!(message_id = %msg.message_id, "dropping pre-start event");
            return;
        }

        if !self.dedup.first_time(&msg.message_id) {
            debug!(message_id = %msg.message_id, "dropping duplicate event");
            return;
        }

        let Some(handlers) = self.handlers.lock().unwrap().clone() else {
            warn!("feishu event before connect(), dropping");
            return;
        };

        if mentioned {
            self.debouncer.on_mention(msg, handlers);
        } else if !self.debouncer.on_followup(msg.clone(), &handlers) {
            (handlers.on_passive_message)(msg);
        }
    }

    /// Normalize a receive_v1 event into (message, was_bot_mentioned).
    fn normalize_event(&self, payload: &Value) -> Option<(ImMessage, bool)> {
        let message = payload.pointer("/event/message")?;
        let chat_id = message.get("chat_id")?.as_str()?.to_string();
        let message_id = message.get("message_id")?.as_str()?.to_string();
        let chat_type = message.get("chat_type").and_then(|v| v.as_str()).unwrap_or("group");
        let message_type = message
            .get("message_type")
            .and_then(|v| v.as_str())
            .unwrap_or("text");

        let sender_id = payload
            .pointer("/event/sender/sender_id/open_id")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let sender_name = payload
            .pointer("/event/sender/sender_id/union_id")
            .and_then(|v| v.as_str())
            .unwrap_or(&sender_id)
            .to_string();

        let content: Value = message
            .get("content")
            .and_then(|v| v.as_str())
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or(Value::Null);

        let (text, attachments) = match message_type {
            "text" => {
                let raw = content.get("text").and_then(|v| v.as_str()).unwrap_or("");
                (strip_mention_tokens(raw), Vec::new())
            }
            "image" => (
                "[Image]".to_string(),
                vec![Attachment {
                    name: "image".into(),
                    path: content
                        .get("image_key")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    mime_type: "image/png".into(),
                }],
            ),
            "file" => {
                let name = content
                    .get("file_name")
                    .and_then(|v| v.as_str())
                    .unwrap_or("file")
                    .to_string();
                (
                    format!("[File:{name}]"),
                    vec![Attachment {
                        name,
                        path: content
                            .get("file_key")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string(),
                        mime_type: "application/octet-stream".into(),
                    }],
                )
            }
            _ => ("[media]".to_string(), Vec::new()),
        };

        let mentions: Vec<String> = message
            .get("mentions")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|m| m.pointer("/id/open_id").and_then(|v| v.as_str()))
                    .map(|s| s.to_string())
                    .collect()
            })
            .unwrap_or_default();

        let bot_open_id = self.bot_open_id.lock().unwrap().clone();
        // DMs always address the bot; group messages need an @-mention.
        let mentioned = chat_type == "p2p"
            || bot_open_id
                .map(|id| mentions.iter().any(|m| *m == id))
                .unwrap_or(false);

        let links = extract_links(&text);

        Some((
            ImMessage {
                chat_id: ChatId::from(chat_id),
                message_id,
                sender_id,
                sender_name,
                text,
                mentions,
                attachments,
                links,
            },
            mentioned,
        ))
    }
}

#[async_trait]
impl ImPlatform for FeishuAdapter {
    fn name(&self) -> &str {
        "feishu"
    }

    async fn connect(&self, handlers: MessageHandlers) -> Result<(), ChannelError> {
        // Resolve the bot's open_id for mention detection.
        let token = self.tenant_token().await?;
        let resp = self
            .client
            .get(format!("{BASE_URL}/open-apis/bot/v3/info"))
            .bearer_auth(token)
            .send()
            .await?;
        let body: Value = resp.json().await?;
        if let Some(open_id) = body.pointer("/bot/open_id").and_then(|v| v.as_str()) {
            *self.bot_open_id.lock().unwrap() = Some(open_id.to_string());
        }

        *self.handlers.lock().unwrap() = Some(handlers);
        debug!("feishu adapter connected");
        Ok(())
    }

    async fn send_text(
        &self,
        chat_id: &str,
        text: &str,
        reply_to: Option<&str>,
    ) -> Result<Option<String>, ChannelError> {
        let content = json!({ "text": text }).to_string();
        let value = match reply_to {
            Some(parent) => {
                self.api_post(
                    &format!("/open-apis/im/v1/messages/{parent}/reply"),
                    json!({ "msg_type": "text", "content": content }),
                )
                .await?
            }
            None => {
                self.api_post(
                    "/open-apis/im/v1/messages?receive_id_type=chat_id",
                    json!({ "receive_id": chat_id, "msg_type": "text", "content": content }),
                )
                .await?
            }
        };
        Ok(value
            .pointer("/data/message_id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()))
    }

    async fn send_card(
        &self,
        chat_id: &str,
        card: &CardContent,
        reply_to: Option<&str>,
    ) -> Result<Option<String>, ChannelError> {
        let content = Self::card_payload(card).to_string();
        let value = match reply_to {
            Some(parent) => {
                self.api_post(
                    &format!("/open-apis/im/v1/messages/{parent}/reply"),
                    json!({ "msg_type": "interactive", "content": content }),
                )
                .await?
            }
            None => {
                self.api_post(
                    "/open-apis/im/v1/messages?receive_id_type=chat_id",
                    json!({ "receive_id": chat_id, "msg_type": "interactive", "content": content }),
                )
                .await?
            }
        };
        Ok(value
            .pointer("/data/message_id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()))
    }

    async fn update_card(&self, message_id: &str, card: &CardContent) -> Result<bool, ChannelError> {
        let content = Self::card_payload(card).to_string();
        self.api_patch(
            &format!("/open-apis/im/v1/messages/{message_id}"),
            json!({ "content": content }),
        )
        .await?;
        Ok(true)
    }

    fn bot_id(&self) -> String {
        self.bot_open_id
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| self.config.app_id.clone())
    }
}

/// Remove Feishu `@_user_N` mention tokens from message text.
fn strip_mention_tokens(text: &str) -> String {
    let re = Regex::new(r"@_user_\d+\s*").unwrap();
    re.replace_all(text, "").trim().to_string()
}

/// Detect reference links (Jira/Figma/GitHub/GitLab) in message text.
pub fn extract_links(text: &str) -> Vec<RefLink> {
    let patterns: [(&str, LinkKind); 4] = [
        (r"https?://[\w.-]*atlassian\.net/browse/[A-Z][A-Z0-9]+-\d+", LinkKind::Jira),
        (r"https?://(?:www\.)?figma\.com/\S+", LinkKind::Figma),
        (r"https?://[\w.-]*github[\w.-]*/\S+", LinkKind::GitHub),
        (r"https?://[\w.-]*gitlab[\w.-]*/\S+", LinkKind::GitLab),
    ];

    let mut links = Vec::new();
    for (pattern, kind) in patterns {
        let Ok(re) = Regex::new(pattern) else {
            continue;
        };
        for m in re.find_iter(text) {
            links.push(RefLink {
                kind,
                url: m.as_str().trim_end_matches([')', ']', ',', '.']).to_string(),
            });
        }
    }
    links
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receive_event(chat_type: &str, text: &str, mentions: Value, ts_ms: i64) -> Value {
        json!({
            "header": { "event_type": "im.message.receive_v1" },
            "event": {
                "sender": { "sender_id": { "open_id": "ou_sender" } },
                "message": {
                    "message_id": "om_1",
                    "chat_id": "oc_chat",
                    "chat_type": chat_type,
                    "message_type": "text",
                    "create_time": ts_ms.to_string(),
                    "content": json!({ "text": text }).to_string(),
                    "mentions": mentions,
                }
            }
        })
    }

    fn adapter() -> Arc<FeishuAdapter> {
        Arc::new(FeishuAdapter::new(FeishuConfig {
            app_id: "cli_app".into(),
            app_secret: "secret".into(),
        }))
    }

    #[test]
    fn normalizes_text_event() {
        let adapter = adapter();
        let event = receive_event("group", "@_user_1 please fix the login", json!([]), i64::MAX);
        let (msg, mentioned) = adapter.normalize_event(&event).unwrap();
        assert_eq!(msg.chat_id.as_str(), "oc_chat");
        assert_eq!(msg.text, "please fix the login");
        assert!(!mentioned, "no bot open_id resolved yet");
    }

    #[test]
    fn p2p_counts_as_mention() {
        let adapter = adapter();
        let event = receive_event("p2p", "hello", json!([]), i64::MAX);
        let (_, mentioned) = adapter.normalize_event(&event).unwrap();
        assert!(mentioned);
    }

    #[test]
    fn group_mention_matches_bot_open_id() {
        let adapter = adapter();
        *adapter.bot_open_id.lock().unwrap() = Some("ou_bot".into());
        let event = receive_event(
            "group",
            "@_user_1 do it",
            json!([{ "key": "@_user_1", "id": { "open_id": "ou_bot" } }]),
            i64::MAX,
        );
        let (_, mentioned) = adapter.normalize_event(&event).unwrap();
        assert!(mentioned);
    }

    #[test]
    fn link_detection_by_kind() {
        let links = extract_links(
            "see https://acme.atlassian.net/browse/OPS-42 and \
             https://github.com/acme/app/pull/7 and \
             https://gitlab.company.com/team/app/-/issues/3",
        );
        let kinds: Vec<LinkKind> = links.iter().map(|l| l.kind).collect();
        assert!(kinds.contains(&LinkKind::Jira));
        assert!(kinds.contains(&LinkKind::GitHub));
        assert!(kinds.contains(&LinkKind::GitLab));
    }

    #[test]
    fn card_payload_adapts_markdown() {
        let card = CardContent::new("run `cargo test`").with_header("Task update");
        let payload = FeishuAdapter::card_payload(&card);
        assert_eq!(
            payload["elements"][0]["content"].as_str().unwrap(),
            "run **cargo test**"
        );
        assert_eq!(payload["header"]["title"]["content"], "Task update");
    }

    #[test]
    fn strip_mentions_handles_multiple_tokens() {
        assert_eq!(
            strip_mention_tokens("@_user_1 hello @_user_2 world"),
            "hello world"
        );
    }
}
