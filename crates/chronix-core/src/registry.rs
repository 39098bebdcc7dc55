//! Task-type handler registry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::error::{HandlerError, SchedulerError, SchedulerResult};

/// Action delegate for one task type.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Perform the action for one occurrence.
    ///
    /// Return `HandlerError::InvalidPayload` when the payload can never be
    /// interpreted; the task is then finalized instead of retried.
    async fn handle(&self, payload: &[u8]) -> Result<(), HandlerError>;
}

/// Maps task types to their handlers. Built once at startup.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `task_type`.
    pub fn register(
        &mut self,
        task_type: impl Into<String>,
        handler: Arc<dyn TaskHandler>,
    ) -> SchedulerResult<()> {
        let task_type = task_type.into();
        if self.handlers.contains_key(&task_type) {
            return Err(SchedulerError::DuplicateHandler(task_type));
        }
        info!("Registered handler for {}", task_type);
        self.handlers.insert(task_type, handler);
        Ok(())
    }

    /// Look up the handler for `task_type`.
    pub fn get(&self, task_type: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(task_type).cloned()
    }

    pub fn contains(&self, task_type: &str) -> bool {
        self.handlers.contains_key(task_type)
    }

    /// Registered task types, sorted.
    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
