//! Configuration for the catalog engines.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default task lease timeout (5 minutes).
const DEFAULT_LEASE_TIMEOUT_SECS: u64 = 300;

/// Configuration of the task leasing queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskQueueConfig {
    /// How long a lease blocks other executors. An executor that dies stops
    /// renewing its lease; after this long the task is reclaimable.
    #[serde(with = "humantime_serde")]
    pub lease_timeout: Duration,
}

impl Default for TaskQueueConfig {
    fn default() -> Self {
        Self {
            lease_timeout: Duration::from_secs(DEFAULT_LEASE_TIMEOUT_SECS),
        }
    }
}

/// Configuration of the catalog service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CatalogConfig {
    /// Task queue settings.
    pub task_queue: TaskQueueConfig,
}
