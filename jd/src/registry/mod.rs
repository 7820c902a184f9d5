//! Job registry
//!
//! The catalog of known jobs and the due-job evaluation that combines
//! schedules, the circuit breaker, and same-epoch dependency checks.

mod catalog;
mod error;
mod graph;

pub use catalog::{Dispatch, JobInfo, JobRegistry, SkipReason};
pub use error::RegistryError;
pub use graph::{DependencyGraph, find_cycle, topological_order};
