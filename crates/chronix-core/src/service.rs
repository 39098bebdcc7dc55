//! Scheduler service: owns the shared components and runs the background loops.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::config::{DispatcherConfig, WorkerConfig};
use crate::dispatcher::Dispatcher;
use crate::error::{SchedulerError, SchedulerResult};
use crate::gateway::{InMemoryQueue, QueueGateway};
use crate::processor::Processor;
use crate::registry::{HandlerRegistry, TaskHandler};
use crate::store::{MemoryTaskStore, TaskStore};
use crate::submission::{SubmitReceipt, SubmitRequest};
use crate::task::ScheduledTask;
use crate::worker::{WorkerPool, WorkerStats};

#[cfg(test)]
#[path = "service_tests.rs"]
mod tests;

/// Builder for [`SchedulerService`].
pub struct SchedulerServiceBuilder {
    store: Option<Arc<dyn TaskStore>>,
    clock: Arc<dyn Clock>,
    registry: HandlerRegistry,
    dispatcher: DispatcherConfig,
    workers: WorkerConfig,
}

impl SchedulerServiceBuilder {
    fn new() -> Self {
        Self {
            store: None,
            clock: Arc::new(SystemClock),
            registry: HandlerRegistry::new(),
            dispatcher: DispatcherConfig::default(),
            workers: WorkerConfig::default(),
        }
    }

    /// Use `store` for persistence. Defaults to an in-memory store.
    pub fn store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn dispatcher_config(mut self, config: DispatcherConfig) -> Self {
        self.dispatcher = config;
        self
    }

    pub fn worker_config(mut self, config: WorkerConfig) -> Self {
        self.workers = config;
        self
    }

    /// Register a handler. Fails if `task_type` already has one.
    pub fn handler(
        mut self,
        task_type: impl Into<String>,
        handler: Arc<dyn TaskHandler>,
    ) -> SchedulerResult<Self> {
        self.registry.register(task_type, handler)?;
        Ok(self)
    }

    /// Replace the registry wholesale.
    pub fn registry(mut self, registry: HandlerRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn build(self) -> SchedulerService {
        SchedulerService {
            store: self
                .store
                .unwrap_or_else(|| Arc::new(MemoryTaskStore::new())),
            clock: self.clock,
            registry: Arc::new(self.registry),
            dispatcher: self.dispatcher,
            workers: self.workers,
        }
    }
}

/// Explicitly constructed scheduler, shared by the HTTP boundary and the
/// background loops.
pub struct SchedulerService {
    store: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
    registry: Arc<HandlerRegistry>,
    dispatcher: DispatcherConfig,
    workers: WorkerConfig,
}

impl SchedulerService {
    pub fn builder() -> SchedulerServiceBuilder {
        SchedulerServiceBuilder::new()
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// Validate and persist a new task.
    ///
    /// Task types without a registered handler are rejected here, before
    /// they can reach a processor.
    pub async fn submit(&self, request: SubmitRequest) -> SchedulerResult<SubmitReceipt> {
        if !self.registry.contains(&request.task_type) {
            return Err(SchedulerError::Validation(format!(
                "no handler registered for task type '{}'",
                request.task_type
            )));
        }

        let task = request.into_task()?.stamped_at(self.clock.now());
        self.store.insert(&task).await?;
        info!(
            "Scheduled task {} ({}) for {}",
            task.id, task.task_type, task.run_at
        );
        Ok(SubmitReceipt::from(&task))
    }

    /// Load a task by ID.
    pub async fn task(&self, id: &Uuid) -> SchedulerResult<Option<ScheduledTask>> {
        self.store.get(id).await
    }

    /// Start the dispatcher and worker pool over an in-process queue.
    pub fn start(&self) -> RunningScheduler {
        let (queue, receiver) = InMemoryQueue::new(self.workers.queue_capacity);
        let gateway = Arc::new(queue);

        let dispatcher = Arc::new(Dispatcher::new(
            self.store.clone(),
            gateway.clone(),
            self.clock.clone(),
            self.dispatcher.clone(),
        ));
        let processor = Processor::new(self.store.clone(), self.registry.clone())
            .with_clock(self.clock.clone())
            .with_handler_timeout(self.workers.handler_timeout());
        let pool = Arc::new(WorkerPool::new(Arc::new(processor), self.workers.clone()));

        let (dispatcher_tx, dispatcher_rx) = watch::channel(false);
        let (workers_tx, workers_rx) = watch::channel(false);

        let dispatcher_handle = tokio::spawn(dispatcher.run(dispatcher_rx));
        let workers_handle = tokio::spawn(pool.clone().run(receiver, workers_rx));

        info!(
            "Scheduler started with handlers: {:?}",
            self.registry.registered_types()
        );

        RunningScheduler {
            dispatcher_tx,
            workers_tx,
            dispatcher_handle,
            workers_handle,
            gateway,
            pool,
        }
    }
}

/// Handle to the background loops started by [`SchedulerService::start`].
pub struct RunningScheduler {
    dispatcher_tx: watch::Sender<bool>,
    workers_tx: watch::Sender<bool>,
    dispatcher_handle: JoinHandle<()>,
    workers_handle: JoinHandle<bool>,
    gateway: Arc<InMemoryQueue>,
    pool: Arc<WorkerPool>,
}

impl RunningScheduler {
    pub fn worker_stats(&self) -> WorkerStats {
        self.pool.stats()
    }

    /// Stop dispatching, drain the workers, then close the queue.
    ///
    /// Returns `true` if all in-flight work finished within the shutdown
    /// timeout.
    pub async fn shutdown(self) -> bool {
        info!("Stopping dispatcher");
        let _ = self.dispatcher_tx.send(true);
        if let Err(e) = self.dispatcher_handle.await {
            error!("Dispatcher task failed: {}", e);
        }

        info!("Stopping workers");
        let _ = self.workers_tx.send(true);
        let drained = match self.workers_handle.await {
            Ok(drained) => drained,
            Err(e) => {
                error!("Worker pool task failed: {}", e);
                false
            }
        };

        self.gateway.close().await;
        info!("Scheduler stopped");
        drained
    }
}
