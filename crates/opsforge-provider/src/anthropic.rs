use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::provider::{parse_retry_after, AiProvider, ProviderError};
use crate::types::{ContentBlock, MessageRequest, MessageResponse, MsgRole, StopReason, Usage};

const API_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.anthropic.com".to_string()),
        }
    }
}

#[async_trait]
impl AiProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn create_message(&self, req: &MessageRequest) -> Result<MessageResponse, ProviderError> {
        let body = build_request_body(req);
        let url = format!("{}/v1/messages", self.base_url);

        debug!(model = %req.model, messages = req.messages.len(), "sending request to Anthropic");

        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status == 429 {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            return Err(ProviderError::RateLimited { retry_after });
        }

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "Anthropic API error");
            return Err(ProviderError::Api {
                status,
                message: text,
            });
        }

        let api_resp: ApiResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        Ok(parse_response(api_resp))
    }
}

fn build_request_body(req: &MessageRequest) -> serde_json::Value {
    let messages: Vec<serde_json::Value> = req
        .messages
        .iter()
        .map(|m| {
            let role = match m.role {
                MsgRole::User => "user",
                MsgRole::Assistant => "assistant",
            };
            let blocks: Vec<serde_json::Value> =
                m.content.iter().map(block_to_wire).collect();
            serde_json::json!({ "role": role, "content": blocks })
        })
        .collect();

    let mut body = serde_json::json!({
        "model": req.model,
        "max_tokens": req.max_tokens,
        "system": req.system,
        "messages": messages,
    });

    if !req.tools.is_empty() {
        let tools: Vec<serde_json::Value> = req
            .tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.input_schema,
                })
            })
            .collect();
        body["tools"] = serde_json::Value::Array(tools);
    }

    if let Some(temp) = req.temperature {
        body["temperature"] = serde_json::json!(temp);
    }

    body
}

fn block_to_wire(block: &ContentBlock) -> serde_json::Value {
    match block {
        ContentBlock::Text { text } => serde_json::json!({ "type": "text", "text": text }),
        ContentBlock::Image { data, media_type } => serde_json::json!({
            "type": "image",
            "source": { "type": "base64", "media_type": media_type, "data": data },
        }),
        ContentBlock::ToolUse { id, name, input } => serde_json::json!({
            "type": "tool_use", "id": id, "name": name, "input": input,
        }),
        ContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => serde_json::json!({
            "type": "tool_result",
            "tool_use_id": tool_use_id,
            "content": content,
            "is_error": is_error,
        }),
    }
}

fn parse_response(resp: ApiResponse) -> MessageResponse {
    let mut content = Vec::new();
    for block in resp.content {
        match block {
            WireBlock::Text { text } => content.push(ContentBlock::Text { text }),
            WireBlock::ToolUse { id, name, input } => {
                content.push(ContentBlock::ToolUse { id, name, input })
            }
            WireBlock::Unknown => {}
        }
    }

    MessageResponse {
        content,
        stop_reason: StopReason::parse(resp.stop_reason.as_deref().unwrap_or("")),
        usage: Some(Usage {
            input_tokens: resp.usage.input_tokens,
            output_tokens: resp.usage.output_tokens,
        }),
    }
}

// Anthropic API response types (private — only used for deserialization)

#[derive(Deserialize)]
struct ApiResponse {
    content: Vec<WireBlock>,
    stop_reason: Option<String>,
    usage: WireUsage,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum WireBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize)]
struct WireUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChatMessage;

    #[test]
    fn body_carries_tool_blocks() {
        let mut req = MessageRequest::new("claude-sonnet-4-6", "be helpful");
        req.messages.push(ChatMessage::assistant(vec![
            ContentBlock::text("running the tool"),
            ContentBlock::ToolUse {
                id: "toolu_1".into(),
                name: "read_file".into(),
                input: serde_json::json!({"path": "src/main.rs"}),
            },
        ]));
        req.messages.push(ChatMessage::user_blocks(vec![
            ContentBlock::tool_result("toolu_1", "fn main() {}", false),
        ]));

        let body = build_request_body(&req);
        let msgs = body["messages"].as_array().unwrap();
        assert_eq!(msgs[0]["content"][1]["type"], "tool_use");
        assert_eq!(msgs[1]["content"][0]["tool_use_id"], "toolu_1");
        assert_eq!(msgs[1]["content"][0]["is_error"], false);
    }

    #[test]
    fn image_blocks_use_base64_source() {
        let mut req = MessageRequest::new("m", "s");
        req.messages.push(ChatMessage::user_blocks(vec![ContentBlock::Image {
            data: "aGk=".into(),
            media_type: "image/png".into(),
        }]));
        let body = build_request_body(&req);
        let source = &body["messages"][0]["content"][0]["source"];
        assert_eq!(source["type"], "base64");
        assert_eq!(source["media_type"], "image/png");
    }

    #[test]
    fn response_parsing_keeps_tool_use_order() {
        let api = ApiResponse {
            content: vec![
                WireBlock::Text { text: "first".into() },
                WireBlock::ToolUse {
                    id: "a".into(),
                    name: "t".into(),
                    input: serde_json::json!({}),
                },
            ],
            stop_reason: Some("tool_use".into()),
            usage: WireUsage {
                input_tokens: 10,
                output_tokens: 5,
            },
        };
        let resp = parse_response(api);
        assert_eq!(resp.stop_reason, StopReason::ToolUse);
        assert_eq!(resp.content.len(), 2);
    }
}
