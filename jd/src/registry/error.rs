//! Registry errors

use thiserror::Error;

/// Configuration errors raised while building the job catalog.
///
/// All of them are fatal at startup.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("job '{0}' is already registered")]
    DuplicateJob(String),

    #[error("cyclic dependency: {}", .path.join(" -> "))]
    CyclicDependency { path: Vec<String> },

    #[error("job '{job}' depends on unknown job '{dependency}'")]
    UnknownDependency { job: String, dependency: String },

    #[error("job '{job}' has an invalid schedule: {reason}")]
    InvalidSchedule { job: String, reason: String },

    #[error("no job named '{0}'")]
    UnknownJob(String),
}
