//! Submission boundary types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{SchedulerError, SchedulerResult};
use crate::task::ScheduledTask;

/// A request to schedule a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub owner_id: String,
    pub task_type: String,
    /// Opaque to the scheduler; interpreted by the handler for `task_type`.
    pub payload: Vec<u8>,
    pub run_at: DateTime<Utc>,
    #[serde(default)]
    pub recurrence_interval: Option<u64>,
    #[serde(default)]
    pub recurrence_limit: Option<u32>,
}

impl SubmitRequest {
    pub fn new(
        owner_id: impl Into<String>,
        task_type: impl Into<String>,
        payload: Vec<u8>,
        run_at: DateTime<Utc>,
    ) -> Self {
        Self {
            owner_id: owner_id.into(),
            task_type: task_type.into(),
            payload,
            run_at,
            recurrence_interval: None,
            recurrence_limit: None,
        }
    }

    /// Repeat every `seconds`.
    pub fn every(mut self, seconds: u64) -> Self {
        self.recurrence_interval = Some(seconds);
        self
    }

    /// Stop after `limit` occurrences.
    pub fn times(mut self, limit: u32) -> Self {
        self.recurrence_limit = Some(limit);
        self
    }

    /// Build the pending task, rejecting malformed requests.
    pub fn into_task(self) -> SchedulerResult<ScheduledTask> {
        if self.owner_id.trim().is_empty() {
            return Err(SchedulerError::Validation(
                "owner_id must not be empty".to_string(),
            ));
        }

        let mut task = ScheduledTask::new(self.owner_id, self.task_type, self.payload, self.run_at);
        task.recurrence_interval = self.recurrence_interval;
        task.recurrence_limit = self.recurrence_limit;
        task.validate()?;
        Ok(task)
    }
}

/// Acknowledgement of an accepted submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitReceipt {
    pub id: Uuid,
    /// First occurrence, at the precision the store keeps.
    pub run_at: DateTime<Utc>,
}

impl From<&ScheduledTask> for SubmitReceipt {
    fn from(task: &ScheduledTask) -> Self {
        Self {
            id: task.id,
            run_at: task.run_at,
        }
    }
}
