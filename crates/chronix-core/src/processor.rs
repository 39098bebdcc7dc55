//! Per-occurrence processing: re-validate, run the handler, finalize.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::{HandlerError, SchedulerResult};
use crate::gateway::DispatchMessage;
use crate::registry::HandlerRegistry;
use crate::store::TaskStore;
use crate::task::{Finalization, ScheduledTask, TaskStatus};

#[cfg(test)]
#[path = "processor_tests.rs"]
mod tests;

/// Why a delivery was ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No task with the message's ID.
    Missing,
    /// The task is not claimed (already finalized, released or reclaimed).
    NotProcessing(TaskStatus),
    /// The task moved on to a different occurrence.
    StaleOccurrence,
}

/// What the handler did for a finalized occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    Succeeded,
    Failed(HandlerError),
    /// No handler is registered for the task type.
    Unregistered,
}

/// Result of processing one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Skipped(SkipReason),
    Finalized {
        finalization: Finalization,
        handler: HandlerOutcome,
    },
}

impl ProcessOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, ProcessOutcome::Skipped(_))
    }
}

/// Executes delivered occurrences against the store and handler registry.
pub struct Processor {
    store: Arc<dyn TaskStore>,
    registry: Arc<HandlerRegistry>,
    clock: Arc<dyn Clock>,
    handler_timeout: Duration,
}

impl Processor {
    pub fn new(store: Arc<dyn TaskStore>, registry: Arc<HandlerRegistry>) -> Self {
        Self {
            store,
            registry,
            clock: Arc::new(SystemClock),
            handler_timeout: Duration::from_secs(30),
        }
    }

    /// Stamp finalizations with `clock` instead of wall time.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Set the handler timeout.
    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = timeout;
        self
    }

    /// Process one delivered message.
    ///
    /// Duplicate and stale deliveries return `Skipped` without touching the
    /// store or invoking a handler.
    pub async fn process(&self, message: &DispatchMessage) -> SchedulerResult<ProcessOutcome> {
        let Some(task) = self.store.get(&message.task_id).await? else {
            warn!("Skipping delivery for unknown task {}", message.task_id);
            return Ok(ProcessOutcome::Skipped(SkipReason::Missing));
        };

        if task.status != TaskStatus::Processing {
            warn!(
                "Skipping delivery for task {}: status is {}",
                task.id, task.status
            );
            return Ok(ProcessOutcome::Skipped(SkipReason::NotProcessing(task.status)));
        }

        if task.run_at != message.run_at {
            warn!(
                "Skipping stale delivery for task {}: message run_at {} but task run_at {}",
                task.id, message.run_at, task.run_at
            );
            return Ok(ProcessOutcome::Skipped(SkipReason::StaleOccurrence));
        }

        let handler = self.invoke(&task).await;
        let finalization = match &handler {
            HandlerOutcome::Succeeded => task.next_finalization(),
            HandlerOutcome::Failed(e) if e.is_poison() => task.poisoned_finalization(),
            HandlerOutcome::Failed(_) => task.next_finalization(),
            HandlerOutcome::Unregistered => task.poisoned_finalization(),
        };

        self.store
            .finalize(&task.id, task.run_at, finalization, self.clock.now())
            .await?;

        match finalization.run_at {
            Some(next) if finalization.status == TaskStatus::Pending => info!(
                "Task {} rescheduled for {} (occurrence {})",
                task.id, next, finalization.recurrence_count
            ),
            _ => info!(
                "Task {} completed after {} occurrence(s)",
                task.id, finalization.recurrence_count
            ),
        }

        Ok(ProcessOutcome::Finalized {
            finalization,
            handler,
        })
    }

    async fn invoke(&self, task: &ScheduledTask) -> HandlerOutcome {
        let Some(handler) = self.registry.get(&task.task_type) else {
            error!(
                "No handler registered for task type '{}' (task {})",
                task.task_type, task.id
            );
            return HandlerOutcome::Unregistered;
        };

        debug!("Running handler for task {} ({})", task.id, task.task_type);
        let result = tokio::time::timeout(self.handler_timeout, handler.handle(&task.payload))
            .await
            .unwrap_or(Err(HandlerError::Timeout(self.handler_timeout)));

        match result {
            Ok(()) => HandlerOutcome::Succeeded,
            Err(e) => {
                if e.is_poison() {
                    error!("Task {} has a malformed payload: {}", task.id, e);
                } else {
                    warn!("Handler failed for task {}: {}", task.id, e);
                }
                HandlerOutcome::Failed(e)
            }
        }
    }
}
