//! JobDaemon - scheduled job orchestrator
//!
//! Runs a catalog of named jobs on calendar schedules. Each dispatch is
//! gated by a per-job circuit breaker and by same-day dependencies, every
//! run is recorded by the execution tracker, and jobs that call external
//! APIs share token-bucket rate limiters with FIFO wait queues.

pub mod breaker;
pub mod cli;
pub mod config;
pub mod control;
pub mod domain;
pub mod jobs;
pub mod ratelimit;
pub mod registry;
pub mod runtime;
pub mod scheduler;
pub mod tracker;

pub use breaker::{BreakerConfig, CircuitBreaker, CircuitState};
pub use config::Config;
pub use control::JobControl;
pub use domain::{
    ExecutionStatus, JobBody, JobCategory, JobDefinition, JobExecutionRecord, JobFailure, JobOutput, Outcome, Priority, Schedule,
    job_fn,
};
pub use ratelimit::{RateLimitError, RateLimiter};
pub use registry::{JobRegistry, RegistryError};
pub use runtime::Runtime;
pub use scheduler::{Scheduler, SchedulerConfig};
pub use tracker::ExecutionTracker;
