//! Task CRUD + control endpoints.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use opsforge_core::types::TaskMetadata;

use crate::app::AppState;
use crate::http::auth::require_secret;

type Handler = Result<Json<Value>, StatusCode>;

pub async fn list_tasks(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Handler {
    require_secret(&headers, &state.config.server.secret)?;
    Ok(Json(json!({ "tasks": state.runner.store().list() })))
}

pub async fn get_task(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Handler {
    require_secret(&headers, &state.config.server.secret)?;
    let task = state.runner.store().get(&id).ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(json!({ "task": task })))
}

#[derive(Deserialize)]
pub struct CreateTaskBody {
    pub prompt: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub created_by: Option<String>,
}

pub async fn create_task(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateTaskBody>,
) -> Handler {
    require_secret(&headers, &state.config.server.secret)?;
    let id = state.runner.run_task(
        body.prompt,
        TaskMetadata {
            title: body.title,
            ..Default::default()
        },
        body.created_by.unwrap_or_else(|| "api".to_string()),
    );
    Ok(Json(json!({ "id": id })))
}

#[derive(Deserialize)]
pub struct PatchTaskBody {
    #[serde(default)]
    pub title: Option<String>,
}

pub async fn patch_task(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<PatchTaskBody>,
) -> Handler {
    require_secret(&headers, &state.config.server.secret)?;
    state
        .runner
        .store()
        .update(&id, |task| {
            if let Some(title) = body.title.clone() {
                task.metadata.title = Some(title);
            }
        })
        .map_err(|_| StatusCode::NOT_FOUND)?;
    let task = state.runner.store().get(&id).ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(json!({ "task": task })))
}

/// Tasks are never removed from the store; DELETE stops an active task and
/// reports its terminal record.
pub async fn delete_task(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Handler {
    require_secret(&headers, &state.config.server.secret)?;
    if state.runner.store().get(&id).is_none() {
        return Err(StatusCode::NOT_FOUND);
    }
    let stopped = state.runner.stop_task(&id);
    Ok(Json(json!({ "stopped": stopped })))
}

pub async fn stop_task(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Handler {
    require_secret(&headers, &state.config.server.secret)?;
    Ok(Json(json!({ "stopped": state.runner.stop_task(&id) })))
}

/// Retry re-enqueues the same prompt as a fresh task (status history is
/// monotonic, so the old record stays as it ended).
pub async fn retry_task(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Handler {
    require_secret(&headers, &state.config.server.secret)?;
    let task = state.runner.store().get(&id).ok_or(StatusCode::NOT_FOUND)?;
    let new_id = state
        .runner
        .run_task(task.prompt, task.metadata, task.created_by);
    Ok(Json(json!({ "id": new_id })))
}

#[derive(Deserialize)]
pub struct ContinueBody {
    #[serde(default)]
    pub instructions: Option<String>,
}

/// Continue starts a fresh task carrying the prior output as context.
pub async fn continue_task(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<ContinueBody>,
) -> Handler {
    require_secret(&headers, &state.config.server.secret)?;
    let task = state.runner.store().get(&id).ok_or(StatusCode::NOT_FOUND)?;

    let mut prompt = format!(
        "Continue a previous task.\n\nOriginal request:\n{}\n\nPrevious session output:\n{}",
        task.prompt, task.output
    );
    if let Some(extra) = body.instructions {
        prompt.push_str("\n\nAdditional instructions:\n");
        prompt.push_str(&extra);
    }

    let new_id = state.runner.run_task(prompt, task.metadata, task.created_by);
    Ok(Json(json!({ "id": new_id })))
}
