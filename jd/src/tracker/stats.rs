//! Aggregate statistics over execution records

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{ExecutionStatus, JobCategory, JobExecutionRecord};

fn rate(successes: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        ((successes as f64 / total as f64) * 10_000.0).round() / 100.0
    }
}

/// Per-job statistics over a trailing window
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct JobStats {
    pub job_name: String,
    /// Completed runs in the window
    pub total: u64,
    pub successes: u64,
    pub failures: u64,
    /// Percentage, two decimals
    pub success_rate: f64,
    pub avg_duration_ms: Option<u64>,
    pub min_duration_ms: Option<u64>,
    pub max_duration_ms: Option<u64>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl JobStats {
    /// Build from any records; non-matching names and running records are ignored
    pub fn from_records<'a>(job_name: &str, records: impl IntoIterator<Item = &'a JobExecutionRecord>) -> Self {
        let mut stats = Self {
            job_name: job_name.to_string(),
            ..Default::default()
        };
        let mut duration_sum = 0u64;
        let mut durations = 0u64;
        let mut last_failure_at: Option<DateTime<Utc>> = None;

        for record in records.into_iter().filter(|r| r.job_name == job_name) {
            let finished = record.completed_at.unwrap_or(record.started_at);
            match record.status {
                ExecutionStatus::Running => continue,
                ExecutionStatus::Success => {
                    stats.successes += 1;
                    if stats.last_success.is_none_or(|t| finished > t) {
                        stats.last_success = Some(finished);
                    }
                }
                ExecutionStatus::Failed => {
                    stats.failures += 1;
                    if last_failure_at.is_none_or(|t| finished > t) {
                        last_failure_at = Some(finished);
                        stats.last_error = record.error_summary.clone();
                    }
                }
            }
            stats.total += 1;
            if let Some(ms) = record.duration_ms {
                duration_sum += ms;
                durations += 1;
                stats.min_duration_ms = Some(stats.min_duration_ms.map_or(ms, |m| m.min(ms)));
                stats.max_duration_ms = Some(stats.max_duration_ms.map_or(ms, |m| m.max(ms)));
            }
        }

        stats.last_failure = last_failure_at;
        stats.success_rate = rate(stats.successes, stats.total);
        if durations > 0 {
            stats.avg_duration_ms = Some(duration_sum / durations);
        }
        stats
    }
}

/// Per-category aggregate
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryStats {
    pub category: JobCategory,
    pub total: u64,
    pub successes: u64,
    pub failures: u64,
    pub success_rate: f64,
}

impl CategoryStats {
    /// One entry per category, in declaration order, including empty ones
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a JobExecutionRecord> + Clone) -> Vec<Self> {
        JobCategory::ALL
            .iter()
            .map(|category| {
                let (mut successes, mut failures) = (0, 0);
                for record in records.clone().into_iter().filter(|r| r.category == *category) {
                    match record.status {
                        ExecutionStatus::Success => successes += 1,
                        ExecutionStatus::Failed => failures += 1,
                        ExecutionStatus::Running => {}
                    }
                }
                Self {
                    category: *category,
                    total: successes + failures,
                    successes,
                    failures,
                    success_rate: rate(successes, successes + failures),
                }
            })
            .collect()
    }
}

/// Whole-process summary used by the heartbeat and `jd status`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackerSummary {
    pub total_executed: u64,
    pub total_failed: u64,
    pub running: usize,
    pub success_rate: f64,
    pub uptime_secs: i64,
}

impl TrackerSummary {
    pub fn new(total_executed: u64, total_failed: u64, running: usize, uptime_secs: i64) -> Self {
        Self {
            total_executed,
            total_failed,
            running,
            success_rate: rate(total_executed - total_failed.min(total_executed), total_executed),
            uptime_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Outcome;
    use chrono::TimeZone;
    use std::time::Duration;

    fn record(name: &str, category: JobCategory, hour: u32, ms: u64, ok: bool) -> JobExecutionRecord {
        let started = Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap();
        let mut record = JobExecutionRecord::start(name, category, started);
        let outcome = if ok {
            Outcome::success()
        } else {
            Outcome::failed(format!("boom at {}", hour))
        };
        record.finish(outcome, Duration::from_millis(ms));
        record
    }

    #[test]
    fn test_job_stats() {
        let records = vec![
            record("a", JobCategory::Ingestion, 1, 100, true),
            record("a", JobCategory::Ingestion, 2, 300, false),
            record("a", JobCategory::Ingestion, 3, 200, true),
            record("b", JobCategory::Publishing, 4, 900, false),
        ];
        let stats = JobStats::from_records("a", &records);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.successes, 2);
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.success_rate, 66.67);
        assert_eq!(stats.avg_duration_ms, Some(200));
        assert_eq!(stats.min_duration_ms, Some(100));
        assert_eq!(stats.max_duration_ms, Some(300));
        assert_eq!(stats.last_error.as_deref(), Some("boom at 2"));
        assert!(stats.last_success.unwrap() > stats.last_failure.unwrap());
    }

    #[test]
    fn test_job_stats_empty() {
        let stats = JobStats::from_records("none", &[]);
        assert_eq!(stats.total, 0);
        assert_eq!(stats.success_rate, 0.0);
        assert!(stats.avg_duration_ms.is_none());
    }

    #[test]
    fn test_category_stats() {
        let records = vec![
            record("a", JobCategory::Ingestion, 1, 100, true),
            record("b", JobCategory::Publishing, 2, 100, false),
            record("c", JobCategory::Publishing, 3, 100, true),
        ];
        let stats = CategoryStats::from_records(&records);
        assert_eq!(stats.len(), JobCategory::ALL.len());
        let publishing = stats.iter().find(|s| s.category == JobCategory::Publishing).unwrap();
        assert_eq!(publishing.total, 2);
        assert_eq!(publishing.success_rate, 50.0);
        let monitoring = stats.iter().find(|s| s.category == JobCategory::Monitoring).unwrap();
        assert_eq!(monitoring.total, 0);
    }

    #[test]
    fn test_summary_rate() {
        let summary = TrackerSummary::new(4, 1, 0, 60);
        assert_eq!(summary.success_rate, 75.0);
    }
}
