//! Scheduler loop
//!
//! Ticks on a fixed interval, asks the registry which jobs are due, and
//! runs each one in its own task under a concurrency ceiling.

mod config;
mod runner;

pub use config::SchedulerConfig;
pub use runner::{LoopState, Scheduler};
