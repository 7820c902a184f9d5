//! Built-in job bodies

mod command;
mod heartbeat;
mod prune;

pub use command::{CommandJob, CommandJobSpec, OnRateLimit, RateLimitGate};
pub use heartbeat::HeartbeatJob;
pub use prune::HistoryPruneJob;
