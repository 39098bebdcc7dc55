//! Queue gateway between the dispatcher and the processors.
//!
//! A message identifies one occurrence of one task. Processors re-read the
//! task from the store, so the message never carries the payload.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;
use uuid::Uuid;

use crate::error::{SchedulerError, SchedulerResult};
use crate::task::ScheduledTask;

/// Occurrence handed from the dispatcher to a processor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchMessage {
    pub task_id: Uuid,
    pub task_type: String,
    /// The `run_at` of the claimed occurrence.
    pub run_at: DateTime<Utc>,
}

impl DispatchMessage {
    /// Build the message for a task's current occurrence.
    pub fn for_task(task: &ScheduledTask) -> Self {
        Self {
            task_id: task.id,
            task_type: task.task_type.clone(),
            run_at: task.run_at,
        }
    }

    /// Encode as JSON bytes.
    pub fn encode(&self) -> SchedulerResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode from JSON bytes.
    pub fn decode(bytes: &[u8]) -> SchedulerResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Opaque broker handle for an accepted message.
pub type DeliveryHandle = Uuid;

/// Outbound side of the work queue.
#[async_trait]
pub trait QueueGateway: Send + Sync {
    /// Hand a message to the queue. Fails with `SchedulerError::Delivery`.
    async fn enqueue(&self, message: &DispatchMessage) -> SchedulerResult<DeliveryHandle>;

    /// Stop accepting messages.
    async fn close(&self);
}

/// A message as received by a processor.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub handle: DeliveryHandle,
    pub bytes: Vec<u8>,
}

/// Bounded in-process queue.
pub struct InMemoryQueue {
    sender: parking_lot::Mutex<Option<mpsc::Sender<Delivery>>>,
}

/// Receiving end of an `InMemoryQueue`.
pub type QueueReceiver = mpsc::Receiver<Delivery>;

impl InMemoryQueue {
    /// Create a queue holding at most `capacity` undelivered messages.
    pub fn new(capacity: usize) -> (Self, QueueReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let queue = Self {
            sender: parking_lot::Mutex::new(Some(tx)),
        };
        (queue, rx)
    }

    /// Check if the queue still accepts messages.
    pub fn is_open(&self) -> bool {
        self.sender
            .lock()
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }
}

#[async_trait]
impl QueueGateway for InMemoryQueue {
    async fn enqueue(&self, message: &DispatchMessage) -> SchedulerResult<DeliveryHandle> {
        let bytes = message.encode()?;
        let handle = Uuid::new_v4();

        let guard = self.sender.lock();
        let tx = guard
            .as_ref()
            .ok_or_else(|| SchedulerError::Delivery("queue is closed".to_string()))?;

        match tx.try_send(Delivery { handle, bytes }) {
            Ok(()) => {
                debug!("Enqueued task {} as {}", message.task_id, handle);
                Ok(handle)
            }
            Err(TrySendError::Full(_)) => {
                Err(SchedulerError::Delivery("queue is full".to_string()))
            }
            Err(TrySendError::Closed(_)) => {
                Err(SchedulerError::Delivery("queue is closed".to_string()))
            }
        }
    }

    async fn close(&self) {
        self.sender.lock().take();
    }
}
