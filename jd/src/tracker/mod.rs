//! Execution tracking
//!
//! One record per job run: created RUNNING at dispatch, completed once,
//! kept in a bounded in-memory history and exported to a record sink.
//! Tracking is best effort and never gates a job.

mod config;
mod error;
mod history;
mod sink;
mod stats;

pub use config::TrackerConfig;
pub use error::TrackingError;
pub use history::ExecutionTracker;
pub use sink::{JsonlRecordSink, RecordSink, read_records};
pub use stats::{CategoryStats, JobStats, TrackerSummary};
