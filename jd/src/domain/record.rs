//! JobExecutionRecord domain type
//!
//! One record per invocation attempt. Created RUNNING at dispatch, completed
//! exactly once. Serializes flat so it can land in any log or table.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::category::JobCategory;
use super::job::JobFailure;

/// Handle returned by the tracker when a run starts
pub type ExecutionId = Uuid;

/// Execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Success,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Final outcome handed to the tracker on completion
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success {
        metadata: HashMap<String, Value>,
    },
    Failed {
        summary: String,
        detail: Option<String>,
        metadata: HashMap<String, Value>,
    },
}

impl Outcome {
    pub fn success() -> Self {
        Self::Success {
            metadata: HashMap::new(),
        }
    }

    pub fn failed(summary: impl Into<String>) -> Self {
        Self::Failed {
            summary: summary.into(),
            detail: None,
            metadata: HashMap::new(),
        }
    }

    /// Build a failure from an eyre report: first line as summary, full chain
    /// as detail, metadata from a `JobFailure` anywhere in the chain
    pub fn from_report(err: &eyre::Report) -> Self {
        Self::Failed {
            summary: err.to_string(),
            detail: Some(format!("{:?}", err)),
            metadata: err
                .downcast_ref::<JobFailure>()
                .map(|failure| failure.metadata.clone())
                .unwrap_or_default(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn status(&self) -> ExecutionStatus {
        match self {
            Self::Success { .. } => ExecutionStatus::Success,
            Self::Failed { .. } => ExecutionStatus::Failed,
        }
    }
}

/// The durable log entry for one job invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobExecutionRecord {
    pub id: ExecutionId,

    /// Weak reference to the job definition
    pub job_name: String,

    pub category: JobCategory,

    pub started_at: DateTime<Utc>,

    /// None while running
    pub completed_at: Option<DateTime<Utc>>,

    pub status: ExecutionStatus,

    /// Short, human-readable failure line
    pub error_summary: Option<String>,

    /// Full causal trace
    pub error_detail: Option<String>,

    /// Wall time in milliseconds, set on completion
    pub duration_ms: Option<u64>,

    /// Job-specific context
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl JobExecutionRecord {
    /// Create a RUNNING record
    pub fn start(job_name: impl Into<String>, category: JobCategory, started_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            job_name: job_name.into(),
            category,
            started_at,
            completed_at: None,
            status: ExecutionStatus::Running,
            error_summary: None,
            error_detail: None,
            duration_ms: None,
            metadata: HashMap::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply the completion. Callers guarantee this happens once.
    pub fn finish(&mut self, outcome: Outcome, duration: std::time::Duration) {
        let duration_ms = duration.as_millis() as u64;
        self.completed_at = Some(self.started_at + chrono::Duration::milliseconds(duration_ms as i64));
        self.duration_ms = Some(duration_ms);
        self.status = outcome.status();
        match outcome {
            Outcome::Success { metadata } => self.metadata.extend(metadata),
            Outcome::Failed {
                summary,
                detail,
                metadata,
            } => {
                self.error_summary = Some(summary);
                self.error_detail = detail;
                self.metadata.extend(metadata);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;

    #[test]
    fn test_start_is_running() {
        let started = Utc.with_ymd_and_hms(2024, 1, 3, 13, 0, 0).unwrap();
        let record = JobExecutionRecord::start("news_thread", JobCategory::Publishing, started);
        assert_eq!(record.status, ExecutionStatus::Running);
        assert!(record.completed_at.is_none());
        assert!(!record.is_terminal());
    }

    #[test]
    fn test_finish_failure() {
        let started = Utc.with_ymd_and_hms(2024, 1, 3, 13, 0, 0).unwrap();
        let mut record = JobExecutionRecord::start("news_thread", JobCategory::Publishing, started);
        record.finish(Outcome::failed("timeout"), Duration::from_millis(1500));

        assert_eq!(record.status, ExecutionStatus::Failed);
        assert_eq!(record.error_summary.as_deref(), Some("timeout"));
        assert_eq!(record.duration_ms, Some(1500));
        assert_eq!(
            record.completed_at,
            Some(Utc.with_ymd_and_hms(2024, 1, 3, 13, 0, 1).unwrap() + chrono::Duration::milliseconds(500))
        );
    }

    #[test]
    fn test_record_serializes_flat() {
        let started = Utc.with_ymd_and_hms(2024, 1, 3, 13, 0, 0).unwrap();
        let mut record = JobExecutionRecord::start("fetch_headlines", JobCategory::Ingestion, started);
        record.finish(
            Outcome::Success {
                metadata: HashMap::from([("headlines".to_string(), Value::from(42))]),
            },
            Duration::from_secs(2),
        );

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["job_name"], "fetch_headlines");
        assert_eq!(json["category"], "ingestion");
        assert_eq!(json["status"], "success");
        assert_eq!(json["duration_ms"], 2000);
        assert_eq!(json["metadata"]["headlines"], 42);
    }

    #[test]
    fn test_outcome_from_report() {
        let err = eyre::eyre!("inner").wrap_err("outer");
        match Outcome::from_report(&err) {
            Outcome::Failed {
                summary,
                detail,
                metadata,
            } => {
                assert_eq!(summary, "outer");
                assert!(detail.unwrap().contains("inner"));
                assert!(metadata.is_empty());
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_failed_record_keeps_failure_metadata() {
        let err = eyre::eyre!("exit status 2")
            .wrap_err(JobFailure::new("export failed").with("rows_written", 120));
        let started = Utc.with_ymd_and_hms(2024, 1, 3, 3, 0, 0).unwrap();
        let mut record = JobExecutionRecord::start("export", JobCategory::Maintenance, started);
        record.finish(Outcome::from_report(&err), Duration::from_secs(4));

        assert_eq!(record.status, ExecutionStatus::Failed);
        assert_eq!(record.error_summary.as_deref(), Some("export failed"));
        assert_eq!(record.metadata["rows_written"], 120);
    }
}
