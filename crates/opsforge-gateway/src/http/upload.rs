//! Attachment upload: raw body in, saved path out.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::app::AppState;
use crate::http::auth::require_secret;

/// 20 MB upload ceiling.
const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

#[derive(Deserialize)]
pub struct UploadQuery {
    pub filename: String,
}

pub async fn upload_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<UploadQuery>,
    body: Bytes,
) -> Result<Json<Value>, StatusCode> {
    require_secret(&headers, &state.config.server.secret)?;

    if body.len() > MAX_UPLOAD_BYTES {
        return Err(StatusCode::PAYLOAD_TOO_LARGE);
    }

    // Flatten the name; uploads never dictate directory structure.
    let safe_name: String = query
        .filename
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '.' || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if safe_name.is_empty() || safe_name.starts_with('.') {
        return Err(StatusCode::BAD_REQUEST);
    }

    let dir = std::path::PathBuf::from(&state.config.memory.data_dir).join("uploads");
    std::fs::create_dir_all(&dir).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let unique = format!("{}-{}", uuid::Uuid::new_v4(), safe_name);
    let path = dir.join(&unique);
    std::fs::write(&path, &body).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(json!({ "path": path.to_string_lossy() })))
}
