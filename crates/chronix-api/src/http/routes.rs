//! HTTP route definitions.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::http::handlers::{get_task, root, schedule_reminder, schedule_task};
use crate::http::monitoring::health_check;
use crate::state::AppState;

/// Create the router.
///
/// ```text
/// GET    /                  - Liveness text
/// GET    /health            - Health check
/// POST   /schedule          - Schedule a task
/// POST   /schedule/reminder - Schedule an email reminder
/// GET    /tasks/{id}        - Task status
/// ```
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/schedule", post(schedule_task))
        .route("/schedule/reminder", post(schedule_reminder))
        .route("/tasks/{id}", get(get_task))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
#[path = "routes_tests.rs"]
mod tests;
