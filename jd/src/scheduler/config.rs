//! Scheduler configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Scheduler loop configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Milliseconds between ticks
    #[serde(rename = "tick-interval-ms", default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Max jobs executing at once
    #[serde(rename = "max-concurrent-jobs", default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// How long in-flight jobs get to finish after a shutdown signal
    #[serde(rename = "shutdown-grace-secs", default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

fn default_tick_interval_ms() -> u64 {
    60_000
}

fn default_max_concurrent_jobs() -> usize {
    8
}

fn default_shutdown_grace_secs() -> u64 {
    60
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}
