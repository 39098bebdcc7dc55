//! Application state.

use std::sync::Arc;
use std::time::Instant;

use chronix_core::SchedulerService;

/// State shared across handlers.
pub struct AppState {
    pub service: Arc<SchedulerService>,
    start_time: Instant,
}

impl AppState {
    pub fn new(service: Arc<SchedulerService>) -> Self {
        Self {
            service,
            start_time: Instant::now(),
        }
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }
}
