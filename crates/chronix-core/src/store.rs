//! Task persistence store.
//!
//! The store is the single source of truth for coordination: every state
//! transition is a conditional update on the stored `status`, so dispatchers
//! and processors running in separate processes never need a shared lock.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::error::{SchedulerError, SchedulerResult};
use crate::task::{Finalization, ScheduledTask, TaskStatus};

/// Task store trait for persistence.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Persist a new pending task.
    async fn insert(&self, task: &ScheduledTask) -> SchedulerResult<Uuid>;

    /// Load a task by ID.
    async fn get(&self, id: &Uuid) -> SchedulerResult<Option<ScheduledTask>>;

    /// Pending tasks with `run_at <= now`, oldest first, ties by ID.
    async fn select_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> SchedulerResult<Vec<ScheduledTask>>;

    /// Atomically move a task from `pending` to `processing`.
    ///
    /// Returns `false` if the task was no longer pending.
    async fn claim(&self, id: &Uuid, now: DateTime<Utc>) -> SchedulerResult<bool>;

    /// Revert a claim, moving the task from `processing` back to `pending`.
    ///
    /// Returns `false` if the task was not processing.
    async fn release(&self, id: &Uuid, now: DateTime<Utc>) -> SchedulerResult<bool>;

    /// Return every claim older than `lease` to `pending`.
    async fn reclaim_expired(&self, now: DateTime<Utc>, lease: TimeDelta)
        -> SchedulerResult<usize>;

    /// Write the outcome of the occurrence scheduled at `occurrence`.
    ///
    /// Only valid while the task is `processing` that same occurrence. A
    /// processor whose claim was reclaimed and superseded by a later
    /// occurrence gets [`SchedulerError::StaleOccurrence`] and changes nothing.
    async fn finalize(
        &self,
        id: &Uuid,
        occurrence: DateTime<Utc>,
        finalization: Finalization,
        now: DateTime<Utc>,
    ) -> SchedulerResult<()>;
}

/// Sort due tasks into dispatch order.
pub(crate) fn dispatch_order(tasks: &mut [ScheduledTask]) {
    tasks.sort_by(|a, b| a.run_at.cmp(&b.run_at).then_with(|| a.id.cmp(&b.id)));
}

/// In-memory task store.
pub struct MemoryTaskStore {
    tasks: RwLock<HashMap<Uuid, ScheduledTask>>,
}

impl MemoryTaskStore {
    /// Create a new memory store.
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored tasks.
    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    /// Check if the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }
}

impl Default for MemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn insert(&self, task: &ScheduledTask) -> SchedulerResult<Uuid> {
        task.validate()?;

        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&task.id) {
            return Err(SchedulerError::Persistence(format!(
                "task {} already exists",
                task.id
            )));
        }
        tasks.insert(task.id, task.clone());
        debug!("Inserted task {} ({})", task.id, task.task_type);
        Ok(task.id)
    }

    async fn get(&self, id: &Uuid) -> SchedulerResult<Option<ScheduledTask>> {
        let tasks = self.tasks.read().await;
        Ok(tasks.get(id).cloned())
    }

    async fn select_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> SchedulerResult<Vec<ScheduledTask>> {
        let tasks = self.tasks.read().await;
        let mut due: Vec<ScheduledTask> = tasks
            .values()
            .filter(|t| t.is_due(now))
            .cloned()
            .collect();
        dispatch_order(&mut due);
        due.truncate(limit);
        Ok(due)
    }

    async fn claim(&self, id: &Uuid, now: DateTime<Utc>) -> SchedulerResult<bool> {
        let mut tasks = self.tasks.write().await;
        let Some(task) = tasks.get_mut(id) else {
            return Ok(false);
        };
        if task.status != TaskStatus::Pending {
            return Ok(false);
        }
        task.status = TaskStatus::Processing;
        task.claimed_at = Some(now);
        task.updated_at = now;
        Ok(true)
    }

    async fn release(&self, id: &Uuid, now: DateTime<Utc>) -> SchedulerResult<bool> {
        let mut tasks = self.tasks.write().await;
        let Some(task) = tasks.get_mut(id) else {
            return Ok(false);
        };
        if task.status != TaskStatus::Processing {
            return Ok(false);
        }
        task.status = TaskStatus::Pending;
        task.claimed_at = None;
        task.updated_at = now;
        Ok(true)
    }

    async fn reclaim_expired(
        &self,
        now: DateTime<Utc>,
        lease: TimeDelta,
    ) -> SchedulerResult<usize> {
        let mut tasks = self.tasks.write().await;
        let mut reclaimed = 0;
        for task in tasks.values_mut() {
            if task.lease_expired(now, lease) {
                task.status = TaskStatus::Pending;
                task.claimed_at = None;
                task.updated_at = now;
                reclaimed += 1;
            }
        }
        Ok(reclaimed)
    }

    async fn finalize(
        &self,
        id: &Uuid,
        occurrence: DateTime<Utc>,
        finalization: Finalization,
        now: DateTime<Utc>,
    ) -> SchedulerResult<()> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(id).ok_or(SchedulerError::TaskNotFound(*id))?;
        if task.status != TaskStatus::Processing {
            return Err(SchedulerError::InvalidTransition {
                id: *id,
                status: task.status,
            });
        }
        if task.run_at != occurrence {
            return Err(SchedulerError::StaleOccurrence {
                id: *id,
                occurrence,
                current: task.run_at,
            });
        }
        task.status = finalization.status;
        if let Some(run_at) = finalization.run_at {
            task.run_at = run_at;
        }
        task.recurrence_count = finalization.recurrence_count;
        task.claimed_at = None;
        task.updated_at = now;
        debug!("Finalized task {} as {}", id, task.status);
        Ok(())
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
