//! Domain types for JobDaemon
//!
//! Job definitions, schedules, categories, and execution records.

mod category;
mod job;
mod record;
mod schedule;

pub use category::{JobCategory, Priority};
pub use job::{FnJob, JobBody, JobDefinition, JobFailure, JobOutput, job_fn};
pub use record::{ExecutionId, ExecutionStatus, JobExecutionRecord, Outcome};
pub use schedule::{Epoch, Schedule, epoch_of, epoch_start};
