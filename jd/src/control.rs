//! Operator control surface
//!
//! Enable or disable jobs by name and query their status. Everything here
//! goes through the registry handle; there is no global lookup.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::breaker::BreakerState;
use crate::domain::JobExecutionRecord;
use crate::ratelimit::{LimiterTelemetry, RateLimiter};
use crate::registry::{JobInfo, JobRegistry, RegistryError};
use crate::tracker::{CategoryStats, JobStats, TrackerSummary};

/// Everything an operator wants to know about one job
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    #[serde(flatten)]
    pub info: JobInfo,
    pub breaker: BreakerState,
    /// Newest first
    pub recent: Vec<JobExecutionRecord>,
    /// Over the tracker's stats window
    pub stats: JobStats,
}

/// Process-wide overview
#[derive(Debug, Clone, Serialize)]
pub struct Overview {
    pub summary: TrackerSummary,
    pub categories: Vec<CategoryStats>,
    pub open_circuits: Vec<String>,
    pub rate_limits: Vec<LimiterTelemetry>,
}

/// Handle for operator commands
#[derive(Clone)]
pub struct JobControl {
    registry: Arc<JobRegistry>,
    limiter: Option<Arc<RateLimiter>>,
}

impl JobControl {
    pub fn new(registry: Arc<JobRegistry>) -> Self {
        Self {
            registry,
            limiter: None,
        }
    }

    pub fn with_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn enable(&self, name: &str) -> Result<(), RegistryError> {
        self.registry.enable(name)
    }

    pub fn disable(&self, name: &str) -> Result<(), RegistryError> {
        self.registry.disable(name)
    }

    /// Close a job's circuit by hand
    pub fn reset_breaker(&self, name: &str) -> Result<(), RegistryError> {
        if !self.registry.contains(name) {
            return Err(RegistryError::UnknownJob(name.to_string()));
        }
        self.registry.breaker().reset(name);
        Ok(())
    }

    /// Status of one job with its last `recent` records
    pub fn job_status(&self, name: &str, recent: usize, now: DateTime<Utc>) -> Result<JobStatus, RegistryError> {
        debug!(%name, recent, "JobControl::job_status: called");
        let info = self
            .registry
            .info(name)
            .ok_or_else(|| RegistryError::UnknownJob(name.to_string()))?;
        let tracker = self.registry.tracker();
        Ok(JobStatus {
            breaker: self.registry.breaker().snapshot(name),
            recent: tracker.recent(name, recent),
            stats: tracker.job_stats(name, now),
            info,
        })
    }

    /// Status of every job, by name
    pub fn all_status(&self, recent: usize, now: DateTime<Utc>) -> Vec<JobStatus> {
        self.registry
            .list()
            .into_iter()
            .filter_map(|info| self.job_status(&info.name, recent, now).ok())
            .collect()
    }

    /// Rate limiter telemetry for every known key
    pub async fn rate_limits(&self) -> Vec<LimiterTelemetry> {
        match &self.limiter {
            Some(limiter) => limiter.telemetry_all().await,
            None => Vec::new(),
        }
    }

    pub async fn overview(&self, now: DateTime<Utc>) -> Overview {
        let tracker = self.registry.tracker();
        Overview {
            summary: tracker.summary(now),
            categories: tracker.category_stats(now),
            open_circuits: self.registry.breaker().open_circuits(),
            rate_limits: self.rate_limits().await,
        }
    }
}
