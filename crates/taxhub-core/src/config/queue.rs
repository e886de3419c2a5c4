//! Job queue and worker dispatch configuration.

use serde::{Deserialize, Serialize};

/// Job queue and worker dispatch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Whether the dispatch loop is enabled.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Maximum number of jobs in `processing` simultaneously.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_jobs: usize,
    /// Interval in milliseconds between dispatch polls when idle.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Seconds to wait for in-flight jobs during shutdown.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_seconds: u64,
    /// Default retention window in days for terminal jobs before cleanup.
    #[serde(default = "default_retention_days")]
    pub completed_retention_days: i64,
    /// Default maximum retries when job creation does not specify one.
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_concurrent_jobs: default_max_concurrent(),
            poll_interval_ms: default_poll_interval(),
            shutdown_grace_seconds: default_shutdown_grace(),
            completed_retention_days: default_retention_days(),
            default_max_retries: default_max_retries(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_concurrent() -> usize {
    5
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_shutdown_grace() -> u64 {
    30
}

fn default_retention_days() -> i64 {
    7
}

fn default_max_retries() -> u32 {
    3
}
