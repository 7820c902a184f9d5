//! Keyed token-bucket rate limiting with FIFO wait queues
//!
//! Each external resource gets a bucket and a queue. Callers either get
//! through now, wait in line for the drain step to release them, or are
//! rejected outright when the request can never fit.

mod bucket;
mod config;
mod error;
mod limiter;
mod queue;

pub use bucket::TokenBucket;
pub use config::{RateLimitConfig, RateLimitsConfig};
pub use error::RateLimitError;
pub use limiter::RateLimiter;
pub use queue::{Decision, KeyStats, LimiterTelemetry, Ticket};
