//! Scheduled task definition and lifecycle rules.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SubsecRound, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SchedulerError;

/// Task status.
///
/// `Pending → Processing` is the claim; `Processing → Pending` reschedules
/// (or releases a claim); `Processing → Completed` terminates. `Completed`
/// is absorbing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Waiting for `run_at`.
    #[default]
    Pending,
    /// Claimed by a dispatcher; an occurrence is in flight.
    Processing,
    /// No further occurrences.
    Completed,
}

impl TaskStatus {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
        }
    }

    /// Whether the status is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "processing" => Ok(TaskStatus::Processing),
            "completed" => Ok(TaskStatus::Completed),
            other => Err(SchedulerError::Persistence(format!(
                "unknown task status '{}'",
                other
            ))),
        }
    }
}

/// A task scheduled for one or more future occurrences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledTask {
    /// Unique task ID.
    pub id: Uuid,
    /// Submitting principal, opaque to the scheduler.
    pub owner_id: String,
    /// Selects the action delegate.
    pub task_type: String,
    /// Delegate-specific payload.
    pub payload: Vec<u8>,
    /// Next scheduled occurrence.
    pub run_at: DateTime<Utc>,
    /// Current status.
    pub status: TaskStatus,
    /// Seconds between occurrences (None = one-shot).
    pub recurrence_interval: Option<u64>,
    /// Maximum number of occurrences (None = unbounded).
    pub recurrence_limit: Option<u32>,
    /// Occurrences already executed.
    pub recurrence_count: u32,
    /// When the current claim was taken.
    pub claimed_at: Option<DateTime<Utc>>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

impl ScheduledTask {
    /// Create a new one-shot pending task.
    ///
    /// `run_at` is truncated to millisecond precision so that every store
    /// round-trips it unchanged. Audit timestamps start at wall time; use
    /// [`ScheduledTask::stamped_at`] to stamp them from a [`Clock`](crate::clock::Clock).
    pub fn new(
        owner_id: impl Into<String>,
        task_type: impl Into<String>,
        payload: impl Into<Vec<u8>>,
        run_at: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now().trunc_subsecs(3);
        Self {
            id: Uuid::new_v4(),
            owner_id: owner_id.into(),
            task_type: task_type.into(),
            payload: payload.into(),
            run_at: run_at.trunc_subsecs(3),
            status: TaskStatus::Pending,
            recurrence_interval: None,
            recurrence_limit: None,
            recurrence_count: 0,
            claimed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Stamp `created_at` and `updated_at` with `now`.
    pub fn stamped_at(mut self, now: DateTime<Utc>) -> Self {
        let now = now.trunc_subsecs(3);
        self.created_at = now;
        self.updated_at = now;
        self
    }

    /// Set the recurrence interval in seconds.
    pub fn with_interval(mut self, seconds: u64) -> Self {
        self.recurrence_interval = Some(seconds);
        self
    }

    /// Set the maximum number of occurrences.
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.recurrence_limit = Some(limit);
        self
    }

    /// Check the recurrence fields are consistent.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.task_type.trim().is_empty() {
            return Err(SchedulerError::Validation(
                "task_type must not be empty".to_string(),
            ));
        }
        if self.recurrence_limit.is_some() && self.recurrence_interval.is_none() {
            return Err(SchedulerError::Validation(
                "recurrence_limit requires recurrence_interval".to_string(),
            ));
        }
        if self.recurrence_interval == Some(0) {
            return Err(SchedulerError::Validation(
                "recurrence_interval must be positive".to_string(),
            ));
        }
        if let Some(interval) = self.recurrence_interval {
            if interval_delta(interval).is_none() {
                return Err(SchedulerError::Validation(format!(
                    "recurrence_interval {} is out of range",
                    interval
                )));
            }
        }
        if self.recurrence_limit == Some(0) {
            return Err(SchedulerError::Validation(
                "recurrence_limit must be positive".to_string(),
            ));
        }
        if let Some(limit) = self.recurrence_limit {
            if self.recurrence_count > limit {
                return Err(SchedulerError::Validation(format!(
                    "recurrence_count {} exceeds recurrence_limit {}",
                    self.recurrence_count, limit
                )));
            }
        }
        Ok(())
    }

    /// Check if the task recurs.
    pub fn is_recurring(&self) -> bool {
        self.recurrence_interval.is_some()
    }

    /// Check if the task is pending and its occurrence has arrived.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Pending && self.run_at <= now
    }

    /// Check if a claim taken at `claimed_at` has outlived `lease`.
    pub fn lease_expired(&self, now: DateTime<Utc>, lease: TimeDelta) -> bool {
        match (self.status, self.claimed_at) {
            (TaskStatus::Processing, Some(claimed_at)) => claimed_at
                .checked_add_signed(lease)
                .is_some_and(|expiry| expiry <= now),
            _ => false,
        }
    }

    /// Next state after an occurrence ran.
    ///
    /// The next `run_at` is anchored to the previously scheduled `run_at`,
    /// not to execution time, so latency never accumulates into drift.
    pub fn next_finalization(&self) -> Finalization {
        let Some(interval) = self.recurrence_interval else {
            return Finalization::completed(self.recurrence_count);
        };

        let count = self.recurrence_count.saturating_add(1);
        if let Some(limit) = self.recurrence_limit {
            if count >= limit {
                return Finalization::completed(count);
            }
        }

        match interval_delta(interval).and_then(|d| self.run_at.checked_add_signed(d)) {
            Some(next) => Finalization::reschedule(next, count),
            None => Finalization::completed(count),
        }
    }

    /// Terminal state for an occurrence that can never succeed.
    pub fn poisoned_finalization(&self) -> Finalization {
        if self.is_recurring() {
            Finalization::completed(self.recurrence_count.saturating_add(1))
        } else {
            Finalization::completed(self.recurrence_count)
        }
    }
}

fn interval_delta(seconds: u64) -> Option<TimeDelta> {
    i64::try_from(seconds).ok().and_then(TimeDelta::try_seconds)
}

/// Values written by `TaskStore::finalize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Finalization {
    /// Status after finalizing (`Pending` or `Completed`).
    pub status: TaskStatus,
    /// New `run_at`, or `None` to leave it unchanged.
    pub run_at: Option<DateTime<Utc>>,
    /// New occurrence count.
    pub recurrence_count: u32,
}

impl Finalization {
    /// Terminate the task.
    pub fn completed(recurrence_count: u32) -> Self {
        Self {
            status: TaskStatus::Completed,
            run_at: None,
            recurrence_count,
        }
    }

    /// Return the task to pending for its next occurrence.
    pub fn reschedule(run_at: DateTime<Utc>, recurrence_count: u32) -> Self {
        Self {
            status: TaskStatus::Pending,
            run_at: Some(run_at),
            recurrence_count,
        }
    }
}

#[cfg(test)]
#[path = "task_tests.rs"]
mod tests;
