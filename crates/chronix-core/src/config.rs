//! Dispatcher and worker configuration.

use std::time::Duration;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

/// Dispatcher configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Milliseconds between dispatch ticks.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Seconds a claim may stay in `processing` before it is reclaimed.
    #[serde(default = "default_lease_timeout_secs")]
    pub lease_timeout_secs: u64,

    /// Maximum tasks selected per tick.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_poll_interval_ms() -> u64 {
    5000
}

fn default_lease_timeout_secs() -> u64 {
    300
}

fn default_batch_size() -> usize {
    100
}

impl DispatcherConfig {
    /// Poll interval as a `Duration`.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Lease timeout as a `TimeDelta`.
    pub fn lease_timeout(&self) -> TimeDelta {
        i64::try_from(self.lease_timeout_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX)
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            lease_timeout_secs: default_lease_timeout_secs(),
            batch_size: default_batch_size(),
        }
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Maximum number of messages processed at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Capacity of the in-process queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Seconds a handler may run before the occurrence counts as failed.
    #[serde(default = "default_handler_timeout_secs")]
    pub handler_timeout_secs: u64,

    /// Seconds to wait for in-flight messages on shutdown.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

fn default_concurrency() -> usize {
    10
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_handler_timeout_secs() -> u64 {
    30
}

fn default_shutdown_timeout_secs() -> u64 {
    5
}

impl WorkerConfig {
    pub fn handler_timeout(&self) -> Duration {
        Duration::from_secs(self.handler_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            queue_capacity: default_queue_capacity(),
            handler_timeout_secs: default_handler_timeout_secs(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}
