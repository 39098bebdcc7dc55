//! Scheduler errors.

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::task::TaskStatus;

/// Scheduler error types.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Malformed submission, rejected before persistence.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Task store unavailable or query failed.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Another dispatcher won the claim race.
    #[error("Task {0} was claimed by another dispatcher")]
    ClaimConflict(Uuid),

    /// Enqueue failed after a successful claim.
    #[error("Delivery error: {0}")]
    Delivery(String),

    /// Action delegate failed.
    #[error("Handler error: {0}")]
    Handler(#[from] HandlerError),

    /// Task not found.
    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    /// State transition not allowed from the current status.
    #[error("Invalid transition for task {id}: status is {status}")]
    InvalidTransition { id: Uuid, status: TaskStatus },

    /// The claim being finalized was superseded by a later occurrence.
    #[error("Task {id} moved on from occurrence {occurrence} to {current}")]
    StaleOccurrence {
        id: Uuid,
        occurrence: DateTime<Utc>,
        current: DateTime<Utc>,
    },

    /// Handler already registered for a task type.
    #[error("Duplicate handler for task type: {0}")]
    DuplicateHandler(String),

    /// Message could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SchedulerError {
    /// Whether a later tick or redelivery may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SchedulerError::Persistence(_)
                | SchedulerError::Delivery(_)
                | SchedulerError::ClaimConflict(_)
        )
    }
}

impl From<tokio_rusqlite::Error> for SchedulerError {
    fn from(err: tokio_rusqlite::Error) -> Self {
        SchedulerError::Persistence(err.to_string())
    }
}

/// Errors reported by task-type action delegates.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HandlerError {
    /// Payload cannot be interpreted; retrying will never help.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// The action was attempted and failed.
    #[error("Execution failed: {0}")]
    Failed(String),

    /// The action did not finish within the handler timeout.
    #[error("Handler timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl HandlerError {
    /// Whether this failure poisons the task.
    pub fn is_poison(&self) -> bool {
        matches!(self, HandlerError::InvalidPayload(_))
    }
}

/// Result type for scheduler operations.
pub type SchedulerResult<T> = Result<T, SchedulerError>;
