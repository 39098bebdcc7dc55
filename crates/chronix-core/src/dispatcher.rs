//! Polling dispatcher that claims due tasks and forwards them to the queue.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::DispatcherConfig;
use crate::error::{SchedulerError, SchedulerResult};
use crate::gateway::{DispatchMessage, QueueGateway};
use crate::store::TaskStore;
use crate::task::ScheduledTask;

#[cfg(test)]
#[path = "dispatcher_tests.rs"]
mod tests;

/// Counters for a single dispatch tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Expired claims returned to pending.
    pub reclaimed: usize,
    /// Tasks returned by the due query.
    pub due: usize,
    /// Tasks this dispatcher claimed.
    pub claimed: usize,
    /// Claims lost to another dispatcher.
    pub conflicts: usize,
    /// Messages accepted by the queue.
    pub enqueued: usize,
    /// Claims whose enqueue failed.
    pub delivery_failures: usize,
}

/// Periodically claims due tasks and enqueues them.
pub struct Dispatcher {
    store: Arc<dyn TaskStore>,
    gateway: Arc<dyn QueueGateway>,
    clock: Arc<dyn Clock>,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn TaskStore>,
        gateway: Arc<dyn QueueGateway>,
        clock: Arc<dyn Clock>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Run the tick loop until `shutdown` turns true or its sender is dropped.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Dispatcher started (poll interval: {:?}, lease: {}s, batch: {})",
            self.config.poll_interval(),
            self.config.lease_timeout_secs,
            self.config.batch_size
        );

        let mut interval = time::interval(self.config.poll_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = interval.tick() => {
                    match self.tick().await {
                        Ok(report) if report != TickReport::default() => {
                            debug!("Dispatch tick: {:?}", report);
                        }
                        Ok(_) => {}
                        Err(e) => error!("Dispatch tick failed: {}", e),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Dispatcher stopped");
    }

    /// Run one dispatch pass.
    ///
    /// Store errors abort the pass; a single task's claim or enqueue failure
    /// does not.
    pub async fn tick(&self) -> SchedulerResult<TickReport> {
        let now = self.clock.now();
        let mut report = TickReport::default();

        report.reclaimed = self
            .store
            .reclaim_expired(now, self.config.lease_timeout())
            .await?;
        if report.reclaimed > 0 {
            warn!("Reclaimed {} task(s) with expired leases", report.reclaimed);
        }

        let due = self.store.select_due(now, self.config.batch_size).await?;
        report.due = due.len();

        for task in &due {
            match self.dispatch(task).await {
                Ok(()) => {
                    report.claimed += 1;
                    report.enqueued += 1;
                }
                Err(SchedulerError::ClaimConflict(id)) => {
                    debug!("Task {} already claimed, skipping", id);
                    report.conflicts += 1;
                }
                Err(SchedulerError::Delivery(e)) => {
                    report.claimed += 1;
                    report.delivery_failures += 1;
                    error!("Failed to enqueue task {}: {}", task.id, e);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(report)
    }

    /// Claim one task and hand it to the queue.
    async fn dispatch(&self, task: &ScheduledTask) -> SchedulerResult<()> {
        if !self.store.claim(&task.id, self.clock.now()).await? {
            return Err(SchedulerError::ClaimConflict(task.id));
        }

        let message = DispatchMessage::for_task(task);
        match self.gateway.enqueue(&message).await {
            Ok(handle) => {
                debug!("Dispatched task {} (delivery {})", task.id, handle);
                Ok(())
            }
            Err(e) => {
                match self.store.release(&task.id, self.clock.now()).await {
                    Ok(true) => debug!("Released claim on task {}", task.id),
                    Ok(false) => warn!("Claim on task {} was already gone", task.id),
                    Err(release_err) => error!(
                        "Failed to release task {}; lease reclaim will recover it: {}",
                        task.id, release_err
                    ),
                }
                Err(match e {
                    SchedulerError::Delivery(_) => e,
                    other => SchedulerError::Delivery(other.to_string()),
                })
            }
        }
    }
}
