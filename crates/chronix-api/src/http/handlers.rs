//! Scheduling handlers.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use chronix_core::{ScheduledTask, SubmitReceipt, SubmitRequest, TaskStatus};
use chronix_reminder::{is_valid_email, EmailReminderPayload, EMAIL_REMINDER};

use crate::error::ApiError;
use crate::state::AppState;

/// Request to schedule an email reminder.
#[derive(Debug, Deserialize)]
pub struct ReminderRequest {
    pub owner_id: String,
    pub email: String,
    pub message: String,
    /// RFC 3339 timestamp of the first occurrence.
    pub run_at: String,
    pub recurrence_interval: Option<u64>,
    pub recurrence_limit: Option<u32>,
}

/// Request to schedule a task of any registered type.
#[derive(Debug, Deserialize)]
pub struct ScheduleRequest {
    pub owner_id: String,
    pub task_type: String,
    /// Handed to the task type's handler as JSON bytes.
    #[serde(default)]
    pub payload: serde_json::Value,
    pub run_at: String,
    pub recurrence_interval: Option<u64>,
    pub recurrence_limit: Option<u32>,
}

/// Response for an accepted submission.
#[derive(Debug, Serialize, Deserialize)]
pub struct ScheduleResponse {
    pub task_id: Uuid,
    pub run_at: String,
}

impl From<SubmitReceipt> for ScheduleResponse {
    fn from(receipt: SubmitReceipt) -> Self {
        Self {
            task_id: receipt.id,
            run_at: receipt.run_at.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        }
    }
}

/// Task status without the payload.
#[derive(Debug, Serialize, Deserialize)]
pub struct TaskView {
    pub id: Uuid,
    pub owner_id: String,
    pub task_type: String,
    pub run_at: DateTime<Utc>,
    pub status: TaskStatus,
    pub recurrence_interval: Option<u64>,
    pub recurrence_limit: Option<u32>,
    pub recurrence_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ScheduledTask> for TaskView {
    fn from(task: ScheduledTask) -> Self {
        Self {
            id: task.id,
            owner_id: task.owner_id,
            task_type: task.task_type,
            run_at: task.run_at,
            status: task.status,
            recurrence_interval: task.recurrence_interval,
            recurrence_limit: task.recurrence_limit,
            recurrence_count: task.recurrence_count,
            created_at: task.created_at,
            updated_at: task.updated_at,
        }
    }
}

fn parse_run_at(value: &str) -> Result<DateTime<Utc>, ApiError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| ApiError::BadRequest(format!("Invalid run_at format: '{}'", value)))
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid body: {}", e.body_text())))
}

/// Liveness text.
///
/// GET /
pub async fn root() -> &'static str {
    "Chronix is running"
}

/// Schedule an email reminder.
///
/// POST /schedule/reminder
pub async fn schedule_reminder(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ReminderRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ScheduleResponse>), ApiError> {
    let req = body(payload)?;

    if req.message.trim().is_empty() {
        return Err(ApiError::BadRequest("message is required".to_string()));
    }
    if !is_valid_email(&req.email) {
        return Err(ApiError::BadRequest(format!(
            "'{}' is not a valid email address",
            req.email
        )));
    }
    let run_at = parse_run_at(&req.run_at)?;

    let reminder = EmailReminderPayload::new(req.owner_id.clone(), req.email, req.message);
    let bytes = serde_json::to_vec(&reminder)
        .map_err(|e| ApiError::Internal(format!("Failed to encode payload: {}", e)))?;

    let mut request = SubmitRequest::new(req.owner_id, EMAIL_REMINDER, bytes, run_at);
    request.recurrence_interval = req.recurrence_interval;
    request.recurrence_limit = req.recurrence_limit;

    let receipt = state.service.submit(request).await?;
    info!("Created scheduled_task {}", receipt.id);
    Ok((StatusCode::CREATED, Json(receipt.into())))
}

/// Schedule a task of any registered type.
///
/// POST /schedule
pub async fn schedule_task(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ScheduleRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ScheduleResponse>), ApiError> {
    let req = body(payload)?;
    let run_at = parse_run_at(&req.run_at)?;
    let bytes = serde_json::to_vec(&req.payload)
        .map_err(|e| ApiError::Internal(format!("Failed to encode payload: {}", e)))?;

    let mut request = SubmitRequest::new(req.owner_id, req.task_type, bytes, run_at);
    request.recurrence_interval = req.recurrence_interval;
    request.recurrence_limit = req.recurrence_limit;

    let receipt = state.service.submit(request).await?;
    info!("Created scheduled_task {}", receipt.id);
    Ok((StatusCode::CREATED, Json(receipt.into())))
}

/// Get a task by ID.
///
/// GET /tasks/{id}
pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TaskView>, ApiError> {
    let id = Uuid::parse_str(&id)
        .map_err(|_| ApiError::BadRequest(format!("Invalid task id: '{}'", id)))?;

    match state.service.task(&id).await? {
        Some(task) => Ok(Json(task.into())),
        None => Err(ApiError::NotFound(format!("Task '{}' not found", id))),
    }
}
