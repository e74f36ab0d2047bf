use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::provider::{parse_retry_after, AiProvider, ProviderError};
use crate::types::{ContentBlock, MessageRequest, MessageResponse, MsgRole, StopReason, Usage};

pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com".to_string()),
        }
    }
}

#[async_trait]
impl AiProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn create_message(&self, req: &MessageRequest) -> Result<MessageResponse, ProviderError> {
        let body = build_request_body(req);
        let url = format!("{}/v1/chat/completions", self.base_url);

        debug!(model = %req.model, messages = req.messages.len(), "sending request to OpenAI");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
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
            warn!(status, body = %text, "OpenAI API error");
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
    let mut messages = vec![serde_json::json!({
        "role": "system",
        "content": req.system,
    })];
    for m in &req.messages {
        messages.extend(convert_message(m));
    }

    let mut body = serde_json::json!({
        "model": req.model,
        "messages": messages,
        "max_tokens": req.max_tokens,
    });

    if !req.tools.is_empty() {
        let tools: Vec<serde_json::Value> = req
            .tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.input_schema,
                    }
                })
            })
            .collect();
        body["tools"] = serde_json::json!(tools);
    }

    if let Some(temp) = req.temperature {
        body["temperature"] = serde_json::json!(temp);
    }

    body
}

/// Convert one content-block message to OpenAI form. Assistant tool_use
/// blocks become `tool_calls`; tool_result blocks become separate `tool`
/// role messages; images become data URLs.
fn convert_message(msg: &crate::types::ChatMessage) -> Vec<serde_json::Value> {
    let has_tool_use = msg
        .content
        .iter()
        .any(|b| matches!(b, ContentBlock::ToolUse { .. }));
    let has_tool_result = msg
        .content
        .iter()
        .any(|b| matches!(b, ContentBlock::ToolResult { .. }));

    if has_tool_use && msg.role == MsgRole::Assistant {
        let mut text_parts = Vec::new();
        let mut tool_calls = Vec::new();
        for block in &msg.content {
            match block {
                ContentBlock::Text { text } => text_parts.push(text.clone()),
                ContentBlock::ToolUse { id, name, input } => {
                    tool_calls.push(serde_json::json!({
                        "id": id,
                        "type": "function",
                        "function": { "name": name, "arguments": input.to_string() },
                    }));
                }
                _ => {}
            }
        }
        let content = if text_parts.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::json!(text_parts.join("\n"))
        };
        return vec![serde_json::json!({
            "role": "assistant",
            "content": content,
            "tool_calls": tool_calls,
        })];
    }

    if has_tool_result {
        return msg
            .content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    ..
                } => Some(serde_json::json!({
                    "role": "tool",
                    "tool_call_id": tool_use_id,
                    "content": content,
                })),
                _ => None,
            })
            .collect();
    }

    let role = match msg.role {
        MsgRole::User => "user",
        MsgRole::Assistant => "assistant",
    };

    let has_image = msg
        .content
        .iter()
        .any(|b| matches!(b, ContentBlock::Image { .. }));
    if has_image {
        let parts: Vec<serde_json::Value> = msg
            .content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => {
                    Some(serde_json::json!({ "type": "text", "text": text }))
                }
                ContentBlock::Image { data, media_type } => Some(serde_json::json!({
                    "type": "image_url",
                    "image_url": { "url": format!("data:{media_type};base64,{data}") },
                })),
                _ => None,
            })
            .collect();
        return vec![serde_json::json!({ "role": role, "content": parts })];
    }

    let text: String = msg
        .content
        .iter()
        .filter_map(|b| match b {
            ContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n");
    vec![serde_json::json!({ "role": role, "content": text })]
}

fn parse_response(resp: ApiResponse) -> MessageResponse {
    let choice = resp.choices.into_iter().next();

    let mut content = Vec::new();
    if let Some(text) = choice
        .as_ref()
        .and_then(|c| c.message.content.as_deref())
        .filter(|t| !t.is_empty())
    {
        content.push(ContentBlock::Text { text: text.to_string() });
    }
    if let Some(calls) = choice.as_ref().and_then(|c| c.message.tool_calls.as_ref()) {
        for call in calls {
            let input: serde_json::Value =
                serde_json::from_str(&call.function.arguments).unwrap_or_default();
            content.push(ContentBlock::ToolUse {
                id: call.id.clone(),
                name: call.function.name.clone(),
                input,
            });
        }
    }

    let raw_reason = choice.and_then(|c| c.finish_reason).unwrap_or_default();

    MessageResponse {
        content,
        stop_reason: StopReason::parse(&raw_reason),
        usage: resp.usage.map(|u| Usage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        }),
    }
}

// OpenAI API response types (private — only used for deserialization)

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<Choice>,
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct Choice {
    message: WireMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireMessage {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Deserialize)]
struct WireFunction {
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChatMessage;

    #[test]
    fn tool_results_become_tool_role_messages() {
        let msg = ChatMessage::user_blocks(vec![
            ContentBlock::tool_result("call_1", "ok", false),
            ContentBlock::tool_result("call_2", "fail", true),
        ]);
        let out = convert_message(&msg);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["role"], "tool");
        assert_eq!(out[0]["tool_call_id"], "call_1");
        assert_eq!(out[1]["tool_call_id"], "call_2");
    }

    #[test]
    fn assistant_tool_use_becomes_tool_calls() {
        let msg = ChatMessage::assistant(vec![
            ContentBlock::text("let me check"),
            ContentBlock::ToolUse {
                id: "call_9".into(),
                name: "search_files".into(),
                input: serde_json::json!({"pattern": "TODO"}),
            },
        ]);
        let out = convert_message(&msg);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["tool_calls"][0]["id"], "call_9");
        assert_eq!(out[0]["tool_calls"][0]["function"]["name"], "search_files");
    }

    #[test]
    fn images_become_data_urls() {
        let msg = ChatMessage::user_blocks(vec![
            ContentBlock::text("see this"),
            ContentBlock::Image {
                data: "QUJD".into(),
                media_type: "image/jpeg".into(),
            },
        ]);
        let out = convert_message(&msg);
        let url = out[0]["content"][1]["image_url"]["url"].as_str().unwrap();
        assert_eq!(url, "data:image/jpeg;base64,QUJD");
    }

    #[test]
    fn finish_reason_length_maps_to_max_tokens() {
        let api = ApiResponse {
            choices: vec![Choice {
                message: WireMessage {
                    content: Some("truncated...".into()),
                    tool_calls: None,
                },
                finish_reason: Some("length".into()),
            }],
            usage: None,
        };
        assert_eq!(parse_response(api).stop_reason, StopReason::MaxTokens);
    }
}
