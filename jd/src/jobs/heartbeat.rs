//! Periodic health report

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use eyre::Result;
use tracing::{info, warn};

use crate::breaker::CircuitBreaker;
use crate::domain::{JobBody, JobCategory, JobDefinition, JobOutput, Priority, Schedule};
use crate::tracker::ExecutionTracker;

/// Logs scheduler health: totals, running jobs, open circuits, recent failures
pub struct HeartbeatJob {
    tracker: Arc<ExecutionTracker>,
    breaker: Arc<CircuitBreaker>,
}

impl HeartbeatJob {
    pub const NAME: &'static str = "heartbeat";

    pub fn new(tracker: Arc<ExecutionTracker>, breaker: Arc<CircuitBreaker>) -> Self {
        Self { tracker, breaker }
    }

    pub fn definition(self, every: std::time::Duration) -> JobDefinition {
        JobDefinition::new(Self::NAME, JobCategory::Monitoring, Schedule::every(every), Arc::new(self))
            .with_priority(Priority::Low)
            .with_description("Report scheduler health")
    }
}

#[async_trait]
impl JobBody for HeartbeatJob {
    async fn run(&self) -> Result<JobOutput> {
        let now = Utc::now();
        let summary = self.tracker.summary(now);
        let open_circuits = self.breaker.open_circuits();
        let window = self.tracker.config().stats_window();
        let recent_failures = self.tracker.failed_since(now - window).len();

        info!(
            executed = summary.total_executed,
            failed = summary.total_failed,
            running = summary.running,
            uptime_secs = summary.uptime_secs,
            recent_failures,
            "Heartbeat"
        );
        if !open_circuits.is_empty() {
            warn!(?open_circuits, "Jobs held back by open circuits");
        }

        Ok(JobOutput::new()
            .with("total_executed", summary.total_executed)
            .with("total_failed", summary.total_failed)
            .with("running", summary.running)
            .with("uptime_secs", summary.uptime_secs)
            .with("recent_failures", recent_failures)
            .with("open_circuits", open_circuits))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Outcome;

    #[tokio::test]
    async fn test_heartbeat_reports_totals() {
        let tracker = Arc::new(ExecutionTracker::default());
        let breaker = Arc::new(CircuitBreaker::default());
        let id = tracker.start("fetch", JobCategory::Ingestion);
        tracker.complete(id, Outcome::failed("boom")).await;
        for _ in 0..3 {
            breaker.record_outcome("fetch", false, Utc::now());
        }

        let def = HeartbeatJob::new(tracker, breaker).definition(std::time::Duration::from_secs(1800));
        assert_eq!(def.category, JobCategory::Monitoring);
        let output = def.body.run().await.unwrap();
        assert_eq!(output.metadata["total_executed"], 1);
        assert_eq!(output.metadata["total_failed"], 1);
        assert_eq!(output.metadata["recent_failures"], 1);
        assert_eq!(output.metadata["open_circuits"], serde_json::json!(["fetch"]));
    }
}
