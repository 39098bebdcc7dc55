//! # Chronix Core
//!
//! Deferred and recurring task scheduling.
//!
//! ## Features
//!
//! - Task store with atomic claims (memory and SQLite)
//! - Polling dispatcher with lease reclaim
//! - Processor with duplicate-delivery detection and drift-free recurrence
//! - Semaphore-bounded worker pool with graceful drain

pub mod clock;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod gateway;
pub mod processor;
pub mod registry;
pub mod schema;
pub mod service;
pub mod sqlite;
pub mod store;
pub mod submission;
pub mod task;
pub mod worker;

#[cfg(test)]
pub(crate) mod store_contract;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{DispatcherConfig, WorkerConfig};
pub use dispatcher::{Dispatcher, TickReport};
pub use error::{HandlerError, SchedulerError, SchedulerResult};
pub use gateway::{Delivery, DeliveryHandle, DispatchMessage, InMemoryQueue, QueueGateway, QueueReceiver};
pub use processor::{HandlerOutcome, ProcessOutcome, Processor, SkipReason};
pub use registry::{HandlerRegistry, TaskHandler};
pub use service::{RunningScheduler, SchedulerService, SchedulerServiceBuilder};
pub use sqlite::SqliteTaskStore;
pub use store::{MemoryTaskStore, TaskStore};
pub use submission::{SubmitReceipt, SubmitRequest};
pub use task::{Finalization, ScheduledTask, TaskStatus};
pub use worker::{WorkerPool, WorkerStats};
