//! Queue types for the rate limiter

use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Result of an admission attempt
#[derive(Debug)]
pub enum Decision {
    /// Tokens taken, proceed now
    Granted,

    /// Waiting in line; await the ticket
    Queued { position: usize, ticket: Ticket },

    /// Can never be satisfied (cost above capacity) or the queue is full
    Rejected { reason: String },
}

impl Decision {
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted)
    }

    pub fn is_queued(&self) -> bool {
        matches!(self, Self::Queued { .. })
    }
}

/// Completion signal for a queued request
#[derive(Debug)]
pub struct Ticket {
    pub(crate) key: String,
    pub(crate) id: u64,
    pub(crate) rx: oneshot::Receiver<()>,
}

impl Ticket {
    /// Non-blocking check whether the drain step has released this request
    pub fn is_released(&mut self) -> bool {
        self.rx.try_recv().is_ok()
    }
}

/// A request waiting for budget
#[derive(Debug)]
pub(crate) struct PendingRequest {
    pub id: u64,
    pub cost: f64,
    pub arrived_at: Instant,
    pub tx: oneshot::Sender<()>,
}

/// Lifetime counters for one key
#[derive(Debug, Default, Clone, Serialize)]
pub struct KeyStats {
    pub total_granted: u64,
    pub total_queued: u64,
    pub total_rejected: u64,
    pub total_timed_out: u64,
    pub total_wait_time_ms: u64,
    pub peak_queue_depth: usize,
}

/// Snapshot of one key for external alerting
#[derive(Debug, Clone, Serialize)]
pub struct LimiterTelemetry {
    pub key: String,
    pub capacity: f64,
    pub tokens_available: f64,
    pub refill_per_sec: f64,
    pub queue_depth: usize,
    /// Estimated wait until the queue head (or a single token) fits, None if never
    pub head_wait_ms: Option<u64>,
    /// Admissions granted inside the telemetry window
    pub recent_granted: u64,
    /// Admissions queued or rejected inside the telemetry window
    pub recent_denied: u64,
    pub stats: KeyStats,
}
