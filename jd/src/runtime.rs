//! Wiring: build the shared services and the job catalog from a Config

use std::sync::Arc;

use eyre::{Context, Result};
use tracing::{debug, info};

use crate::breaker::CircuitBreaker;
use crate::config::Config;
use crate::control::JobControl;
use crate::jobs::{HeartbeatJob, HistoryPruneJob};
use crate::ratelimit::RateLimiter;
use crate::registry::JobRegistry;
use crate::scheduler::Scheduler;
use crate::tracker::{ExecutionTracker, JsonlRecordSink, read_records};

/// Every long-lived service, shared by the scheduler and the control surface
pub struct Runtime {
    pub config: Config,
    pub limiter: Arc<RateLimiter>,
    pub breaker: Arc<CircuitBreaker>,
    pub tracker: Arc<ExecutionTracker>,
    pub sink: Arc<JsonlRecordSink>,
    pub registry: Arc<JobRegistry>,
}

impl Runtime {
    /// Create the services, restore exported history, and register the
    /// built-in and configured jobs. The catalog is not validated here.
    pub fn build(config: Config) -> Result<Self> {
        debug!(jobs = config.jobs.len(), "Runtime::build: called");

        let limiter = Arc::new(RateLimiter::new(config.rate_limits.clone()));
        let breaker = Arc::new(CircuitBreaker::new(config.breaker.clone()));

        let history_dir = config.tracker.history_dir()?;
        let sink = Arc::new(JsonlRecordSink::new(&history_dir));
        let tracker = ExecutionTracker::new(config.tracker.clone()).with_sink(sink.clone());
        let restored = read_records(sink.path()).context("Failed to restore execution history")?;
        if !restored.is_empty() {
            info!(count = restored.len(), path = ?sink.path(), "Restored execution history");
        }
        tracker.restore(restored);
        let tracker = Arc::new(tracker);

        let registry = Arc::new(JobRegistry::new(breaker.clone(), tracker.clone()));

        if config.heartbeat.enabled {
            registry
                .register(HeartbeatJob::new(tracker.clone(), breaker.clone()).definition(config.heartbeat.every()))
                .context("Failed to register heartbeat job")?;
        }
        if config.prune.enabled {
            registry
                .register(
                    HistoryPruneJob::new(sink.clone(), config.prune.retain_days).definition(config.prune.schedule.clone()),
                )
                .context("Failed to register history-prune job")?;
        }
        for spec in config.jobs.iter().cloned() {
            let name = spec.name.clone();
            registry
                .register(spec.into_definition(limiter.clone()))
                .context(format!("Failed to register job {}", name))?;
        }
        info!(count = registry.len(), "Job catalog built");

        Ok(Self {
            config,
            limiter,
            breaker,
            tracker,
            sink,
            registry,
        })
    }

    /// A scheduler loop over this runtime's registry and limiter
    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(self.config.scheduler.clone(), self.registry.clone()).with_limiter(self.limiter.clone())
    }

    pub fn control(&self) -> JobControl {
        JobControl::new(self.registry.clone()).with_limiter(self.limiter.clone())
    }
}
