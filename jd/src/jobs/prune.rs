//! Execution history retention

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use eyre::{Context, Result};
use tracing::info;

use crate::domain::{JobBody, JobCategory, JobDefinition, JobOutput, Priority, Schedule};
use crate::tracker::JsonlRecordSink;

/// Trims the exported history to a retention window
pub struct HistoryPruneJob {
    sink: Arc<JsonlRecordSink>,
    retain_days: u32,
}

impl HistoryPruneJob {
    pub const NAME: &'static str = "history-prune";

    pub fn new(sink: Arc<JsonlRecordSink>, retain_days: u32) -> Self {
        Self { sink, retain_days }
    }

    pub fn definition(self, schedule: Schedule) -> JobDefinition {
        JobDefinition::new(Self::NAME, JobCategory::Maintenance, schedule, Arc::new(self))
            .with_priority(Priority::Low)
            .with_description("Drop exported execution records past retention")
    }
}

#[async_trait]
impl JobBody for HistoryPruneJob {
    async fn run(&self) -> Result<JobOutput> {
        let cutoff = Utc::now() - Duration::days(self.retain_days as i64);
        let sink = self.sink.clone();
        let removed = tokio::task::spawn_blocking(move || sink.prune_before(cutoff))
            .await
            .context("History prune task failed")??;
        info!(removed, %cutoff, "Pruned execution history");
        Ok(JobOutput::new()
            .with("removed", removed)
            .with("cutoff", cutoff.to_rfc3339()))
    }
}
