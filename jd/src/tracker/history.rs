//! The execution tracker

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::config::TrackerConfig;
use super::sink::RecordSink;
use super::stats::{CategoryStats, JobStats, TrackerSummary};
use crate::domain::{ExecutionId, ExecutionStatus, JobCategory, JobExecutionRecord, Outcome};

#[derive(Default)]
struct TrackerInner {
    /// Oldest first
    history: VecDeque<JobExecutionRecord>,
    /// Monotonic start of every running execution
    running: HashMap<ExecutionId, Instant>,
    /// Most recent successful completion per job
    last_success: HashMap<String, DateTime<Utc>>,
    total_executed: u64,
    total_failed: u64,
}

impl TrackerInner {
    /// Drop the oldest completed records until within bounds. Running
    /// records are never evicted.
    fn evict(&mut self, max: usize) {
        while self.history.len() > max {
            let Some(pos) = self.history.iter().position(|r| r.is_terminal()) else {
                break;
            };
            self.history.remove(pos);
        }
    }
}

/// Records the lifecycle of every job run
pub struct ExecutionTracker {
    config: TrackerConfig,
    inner: Mutex<TrackerInner>,
    sink: Option<Arc<dyn RecordSink>>,
    created_at: DateTime<Utc>,
}

impl ExecutionTracker {
    /// Tracker with in-memory history only
    pub fn new(config: TrackerConfig) -> Self {
        debug!(max_history = config.max_history, "ExecutionTracker::new: called");
        Self {
            config,
            inner: Mutex::new(TrackerInner::default()),
            sink: None,
            created_at: Utc::now(),
        }
    }

    /// Also export each completed record to `sink`
    pub fn with_sink(mut self, sink: Arc<dyn RecordSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed history and dependency state from previously exported records
    pub fn restore(&self, records: impl IntoIterator<Item = JobExecutionRecord>) {
        let mut inner = self.lock();
        let mut restored = 0;
        for record in records.into_iter().filter(|r| r.is_terminal()) {
            if record.status == ExecutionStatus::Success
                && let Some(done) = record.completed_at
            {
                let entry = inner.last_success.entry(record.job_name.clone()).or_insert(done);
                if done > *entry {
                    *entry = done;
                }
            }
            inner.history.push_back(record);
            restored += 1;
        }
        inner
            .history
            .make_contiguous()
            .sort_by_key(|r| r.started_at);
        let max = self.config.max_history;
        inner.evict(max);
        debug!(restored, "ExecutionTracker::restore: loaded records");
    }

    /// Create a RUNNING record stamped with the current time
    pub fn start(&self, job_name: &str, category: JobCategory) -> ExecutionId {
        self.start_at(job_name, category, Utc::now())
    }

    /// Create a RUNNING record with an explicit dispatch time
    pub fn start_at(&self, job_name: &str, category: JobCategory, started_at: DateTime<Utc>) -> ExecutionId {
        let record = JobExecutionRecord::start(job_name, category, started_at);
        let id = record.id;
        debug!(%job_name, %id, "ExecutionTracker::start: called");

        let mut inner = self.lock();
        inner.running.insert(id, Instant::now());
        inner.history.push_back(record);
        let max = self.config.max_history;
        inner.evict(max);
        id
    }

    /// Complete a run. A second completion for the same id is ignored and
    /// logged. Returns the finished record on the first call.
    pub async fn complete(&self, id: ExecutionId, outcome: Outcome) -> Option<JobExecutionRecord> {
        debug!(%id, status = %outcome.status(), "ExecutionTracker::complete: called");
        let finished = {
            let mut inner = self.lock();
            let Some(started) = inner.running.remove(&id) else {
                warn!(%id, "Completion for unknown or already completed execution ignored");
                return None;
            };
            let success = outcome.is_success();
            let Some(record) = inner.history.iter_mut().rev().find(|r| r.id == id) else {
                warn!(%id, "Running execution missing from history");
                return None;
            };
            record.finish(outcome, started.elapsed());
            let record = record.clone();

            inner.total_executed += 1;
            if success {
                if let Some(done) = record.completed_at {
                    inner.last_success.insert(record.job_name.clone(), done);
                }
            } else {
                inner.total_failed += 1;
            }
            record
        };

        if let Some(sink) = &self.sink
            && let Err(e) = sink.write(&finished).await
        {
            warn!(id = %finished.id, job_name = %finished.job_name, error = %e, "Failed to export execution record");
        }

        Some(finished)
    }

    /// Most recent successful completion of a job
    pub fn last_success(&self, job_name: &str) -> Option<DateTime<Utc>> {
        self.lock().last_success.get(job_name).copied()
    }

    /// Look up one record
    pub fn get(&self, id: ExecutionId) -> Option<JobExecutionRecord> {
        self.lock().history.iter().find(|r| r.id == id).cloned()
    }

    /// Last `limit` records for a job, newest first
    pub fn recent(&self, job_name: &str, limit: usize) -> Vec<JobExecutionRecord> {
        self.lock()
            .history
            .iter()
            .rev()
            .filter(|r| r.job_name == job_name)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Entire retained history, oldest first
    pub fn history(&self) -> Vec<JobExecutionRecord> {
        self.lock().history.iter().cloned().collect()
    }

    /// Records still RUNNING
    pub fn running(&self) -> Vec<JobExecutionRecord> {
        self.lock()
            .history
            .iter()
            .filter(|r| r.status == ExecutionStatus::Running)
            .cloned()
            .collect()
    }

    /// Failed runs that started at or after `since`, newest first
    pub fn failed_since(&self, since: DateTime<Utc>) -> Vec<JobExecutionRecord> {
        self.lock()
            .history
            .iter()
            .rev()
            .filter(|r| r.status == ExecutionStatus::Failed && r.started_at >= since)
            .cloned()
            .collect()
    }

    fn window(&self, now: DateTime<Utc>) -> Vec<JobExecutionRecord> {
        let since = now - self.config.stats_window();
        self.lock()
            .history
            .iter()
            .filter(|r| r.started_at >= since)
            .cloned()
            .collect()
    }

    /// Stats for one job over the trailing window ending at `now`
    pub fn job_stats(&self, job_name: &str, now: DateTime<Utc>) -> JobStats {
        JobStats::from_records(job_name, &self.window(now))
    }

    /// Per-category stats over the trailing window ending at `now`
    pub fn category_stats(&self, now: DateTime<Utc>) -> Vec<CategoryStats> {
        CategoryStats::from_records(&self.window(now))
    }

    /// Process-lifetime totals
    pub fn summary(&self, now: DateTime<Utc>) -> TrackerSummary {
        let inner = self.lock();
        TrackerSummary::new(
            inner.total_executed,
            inner.total_failed,
            inner.running.len(),
            now.signed_duration_since(self.created_at).num_seconds(),
        )
    }
}

impl Default for ExecutionTracker {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}
