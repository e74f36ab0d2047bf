//! Inbound webhooks: todo-style task creation, and the chat platform event
//! feed (Feishu URL verification + event delivery, Slack event callback).

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use opsforge_core::types::TaskMetadata;

use crate::app::AppState;
use crate::http::auth::require_secret;

#[derive(Deserialize)]
pub struct TodoBody {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub created_by: Option<String>,
}

pub async fn todo_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<TodoBody>,
) -> Result<Json<Value>, StatusCode> {
    require_secret(&headers, &state.config.server.secret)?;

    let prompt = match body.description {
        Some(desc) if !desc.trim().is_empty() => format!("{}\n\n{}", body.title, desc),
        _ => body.title.clone(),
    };
    let id = state.runner.run_task(
        prompt,
        TaskMetadata {
            title: Some(body.title),
            ..Default::default()
        },
        body.created_by.unwrap_or_else(|| "webhook".to_string()),
    );
    Ok(Json(json!({ "id": id })))
}

/// Chat platform event intake. Platform signatures replace the shared
/// secret here: Feishu sends a URL-verification challenge, Slack sends its
/// own `challenge` handshake.
pub async fn im_event_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Value>,
) -> Json<Value> {
    // Feishu URL verification handshake.
    if payload.get("type").and_then(|v| v.as_str()) == Some("url_verification") {
        let challenge = payload
            .get("challenge")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        return Json(json!({ "challenge": challenge }));
    }
    // Slack URL verification handshake.
    if let Some(challenge) = payload.get("challenge").and_then(|v| v.as_str()) {
        if payload.get("token").is_some() && payload.get("event").is_none() {
            return Json(json!({ "challenge": challenge }));
        }
    }

    if let Some(feishu) = &state.feishu {
        feishu.handle_event(&payload);
    }
    if let Some(slack) = &state.slack {
        slack.handle_event(&payload);
    }

    Json(json!({ "ok": true }))
}
