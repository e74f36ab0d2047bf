//! SSE event stream.
//!
//! Clients receive `connected`, an `init` snapshot, then `task` events as
//! state changes. Task output is elided for everyone except the single
//! client that registered for that task via `POST /watch`.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures_util::stream::Stream;
use serde::Deserialize;
use serde_json::{json, Value};

use opsforge_runner::TaskEvent;

use crate::app::AppState;
use crate::http::auth::require_secret;

#[derive(Deserialize)]
pub struct EventsQuery {
    #[serde(default)]
    pub client_id: Option<String>,
}

pub async fn events_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<EventsQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, StatusCode> {
    require_secret(&headers, &state.config.server.secret)?;

    let client_id = query.client_id.unwrap_or_default();
    let mut rx = state.runner.broadcaster().subscribe();
    let snapshot = state.runner.store().list();

    let stream = async_stream::stream! {
        yield Ok(Event::default().event("connected").data("{}"));

        let init = json!({ "tasks": snapshot });
        yield Ok(Event::default().event("init").data(init.to_string()));

        loop {
            match rx.recv().await {
                Ok(event) => {
                    let payload = render_event(&state, &client_id, event);
                    yield Ok(Event::default().event("task").data(payload.to_string()));
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "sse client lagged, events dropped");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Elide output unless this client watches this task.
fn render_event(state: &AppState, client_id: &str, event: TaskEvent) -> Value {
    let mut task = event.task;
    let watching = state
        .watchers
        .get(client_id)
        .map(|entry| *entry.value() == task.id.to_string())
        .unwrap_or(false);
    if !watching {
        task.output = String::new();
    }
    json!({
        "type": event.kind,
        "task": task,
        "timestamp": event.timestamp,
    })
}

#[derive(Deserialize)]
pub struct WatchBody {
    pub client_id: String,
    pub task_id: String,
}

pub async fn watch_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<WatchBody>,
) -> Result<Json<Value>, StatusCode> {
    require_secret(&headers, &state.config.server.secret)?;
    state.watchers.insert(body.client_id, body.task_id);
    Ok(Json(json!({ "ok": true })))
}
