//! Worker pool consuming the in-process queue.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::{watch, Semaphore};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::gateway::{Delivery, DispatchMessage, QueueReceiver};
use crate::processor::{HandlerOutcome, ProcessOutcome, Processor};

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;

/// Counters shared by all workers.
#[derive(Debug, Default)]
struct Counters {
    finalized: AtomicU64,
    skipped: AtomicU64,
    handler_failures: AtomicU64,
    errors: AtomicU64,
}

/// Snapshot of worker pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Occurrences finalized (successful or not).
    pub finalized: u64,
    /// Duplicate or stale deliveries ignored.
    pub skipped: u64,
    /// Finalized occurrences whose handler failed or was missing.
    pub handler_failures: u64,
    /// Deliveries that could not be decoded or finalized.
    pub errors: u64,
}

/// Semaphore-bounded pool invoking the processor for each delivery.
pub struct WorkerPool {
    processor: Arc<Processor>,
    config: WorkerConfig,
    semaphore: Arc<Semaphore>,
    tracker: TaskTracker,
    running: AtomicBool,
    counters: Arc<Counters>,
}

impl WorkerPool {
    /// Create a new worker pool.
    pub fn new(processor: Arc<Processor>, config: WorkerConfig) -> Self {
        let permits = config.concurrency.max(1);
        Self {
            processor,
            config,
            semaphore: Arc::new(Semaphore::new(permits)),
            tracker: TaskTracker::new(),
            running: AtomicBool::new(false),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Check if the pool is consuming.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Number of idle worker slots.
    pub fn available_workers(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Number of deliveries currently being processed.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Current counters.
    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            finalized: self.counters.finalized.load(Ordering::SeqCst),
            skipped: self.counters.skipped.load(Ordering::SeqCst),
            handler_failures: self.counters.handler_failures.load(Ordering::SeqCst),
            errors: self.counters.errors.load(Ordering::SeqCst),
        }
    }

    /// Consume deliveries until shutdown or until the queue closes, then wait
    /// for in-flight work up to the configured shutdown timeout.
    ///
    /// Returns `true` if every in-flight delivery finished in time.
    pub async fn run(
        self: Arc<Self>,
        mut receiver: QueueReceiver,
        mut shutdown: watch::Receiver<bool>,
    ) -> bool {
        self.running.store(true, Ordering::SeqCst);
        info!(
            "Worker pool started with {} workers",
            self.config.concurrency
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let permit = tokio::select! {
                permit = self.semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(e) => {
                        error!("Worker semaphore closed: {}", e);
                        break;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            };

            let delivery = tokio::select! {
                delivery = receiver.recv() => match delivery {
                    Some(delivery) => delivery,
                    None => {
                        info!("Queue closed, worker pool stopping");
                        break;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            };

            let processor = self.processor.clone();
            let counters = self.counters.clone();
            self.tracker.spawn(async move {
                handle_delivery(&processor, &counters, delivery).await;
                drop(permit);
            });
        }

        self.running.store(false, Ordering::SeqCst);
        self.drain().await
    }

    async fn drain(&self) -> bool {
        self.tracker.close();
        let pending = self.tracker.len();
        if pending > 0 {
            info!("Waiting for {} in-flight deliveries", pending);
        }

        let timeout = self.config.shutdown_timeout();
        match tokio::time::timeout(timeout, self.tracker.wait()).await {
            Ok(()) => {
                info!("Worker pool stopped");
                true
            }
            Err(_) => {
                warn!(
                    "Worker pool stopped with {} deliveries still running after {:?}; \
                     their leases will expire and be reclaimed",
                    self.tracker.len(),
                    timeout
                );
                false
            }
        }
    }
}

async fn handle_delivery(processor: &Processor, counters: &Counters, delivery: Delivery) {
    let message = match DispatchMessage::decode(&delivery.bytes) {
        Ok(message) => message,
        Err(e) => {
            error!("Discarding undecodable delivery {}: {}", delivery.handle, e);
            counters.errors.fetch_add(1, Ordering::SeqCst);
            return;
        }
    };

    debug!("Processing delivery {} for task {}", delivery.handle, message.task_id);
    match processor.process(&message).await {
        Ok(ProcessOutcome::Skipped(_)) => {
            counters.skipped.fetch_add(1, Ordering::SeqCst);
        }
        Ok(ProcessOutcome::Finalized { handler, .. }) => {
            counters.finalized.fetch_add(1, Ordering::SeqCst);
            if handler != HandlerOutcome::Succeeded {
                counters.handler_failures.fetch_add(1, Ordering::SeqCst);
            }
        }
        Err(e) => {
            error!("Failed to process task {}: {}", message.task_id, e);
            counters.errors.fetch_add(1, Ordering::SeqCst);
        }
    }
}
