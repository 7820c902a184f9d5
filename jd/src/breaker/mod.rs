//! Per-job circuit breaker
//!
//! Keeps chronically failing jobs from being dispatched every tick while
//! still letting them heal on their own after a cooldown.

mod config;
mod state;

pub use config::BreakerConfig;
pub use state::{BreakerState, CircuitBreaker, CircuitState};
