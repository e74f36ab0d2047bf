use std::sync::Arc;

use axum::{
    routing::{delete, get, patch, post},
    Router,
};
use dashmap::DashMap;

use opsforge_agent::dispatcher::Dispatcher;
use opsforge_channels::{feishu::FeishuAdapter, slack::SlackAdapter};
use opsforge_core::config::OpsforgeConfig;
use opsforge_runner::TaskRunner;

/// Central shared state — passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: OpsforgeConfig,
    pub runner: Arc<TaskRunner>,
    pub dispatcher: Option<Arc<Dispatcher>>,
    pub feishu: Option<Arc<FeishuAdapter>>,
    pub slack: Option<Arc<SlackAdapter>>,
    /// SSE watch registrations: client id -> task id whose full output the
    /// client receives.
    pub watchers: DashMap<String, String>,
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/events", get(crate::http::events::events_handler))
        .route("/watch", post(crate::http::events::watch_handler))
        .route("/task", get(crate::http::tasks::list_tasks))
        .route("/task", post(crate::http::tasks::create_task))
        .route("/task/{id}", get(crate::http::tasks::get_task))
        .route("/task/{id}", patch(crate::http::tasks::patch_task))
        .route("/task/{id}", delete(crate::http::tasks::delete_task))
        .route("/task/{id}/retry", post(crate::http::tasks::retry_task))
        .route("/task/{id}/stop", post(crate::http::tasks::stop_task))
        .route("/task/{id}/continue", post(crate::http::tasks::continue_task))
        .route("/webhook/todo", post(crate::http::webhook::todo_handler))
        .route("/webhook/im", post(crate::http::webhook::im_event_handler))
        .route("/upload", post(crate::http::upload::upload_handler))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
