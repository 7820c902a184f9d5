//! Token bucket state for a single key

use std::time::Duration;

use tokio::time::Instant;

/// Continuous-refill token bucket.
///
/// Fractional tokens are kept between calls. A bucket that has never been
/// observed is full: a fresh process must not mistake "no state yet" for
/// "budget exhausted".
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    tokens: f64,
    last_refill_at: Option<Instant>,
}

impl TokenBucket {
    pub fn new(capacity: f64, refill_per_sec: f64) -> Self {
        Self {
            capacity: capacity.max(0.0),
            refill_per_sec: refill_per_sec.max(0.0),
            tokens: 0.0,
            last_refill_at: None,
        }
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn refill_rate(&self) -> f64 {
        self.refill_per_sec
    }

    /// Lazily add the tokens earned since the last refill
    pub fn refill(&mut self, now: Instant) {
        match self.last_refill_at {
            None => self.tokens = self.capacity,
            Some(last) => {
                let elapsed = now.saturating_duration_since(last).as_secs_f64();
                self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
            }
        }
        self.last_refill_at = Some(now);
    }

    /// Tokens available at `now` without mutating
    pub fn available(&self, now: Instant) -> f64 {
        match self.last_refill_at {
            None => self.capacity,
            Some(last) => {
                let elapsed = now.saturating_duration_since(last).as_secs_f64();
                (self.tokens + elapsed * self.refill_per_sec).min(self.capacity)
            }
        }
    }

    /// Refill, then take `cost` tokens if they are there
    pub fn try_take(&mut self, cost: f64, now: Instant) -> bool {
        self.refill(now);
        if self.tokens >= cost {
            self.tokens -= cost;
            true
        } else {
            false
        }
    }

    /// Give tokens back (a granted request nobody was waiting for)
    pub fn refund(&mut self, cost: f64) {
        self.tokens = (self.tokens + cost).min(self.capacity);
    }

    /// Clamp to a budget reported by the remote side
    pub fn observe_remaining(&mut self, remaining: f64, now: Instant) {
        self.refill(now);
        self.tokens = remaining.clamp(0.0, self.capacity);
    }

    /// Time until `cost` tokens will be available, None if never
    pub fn time_until(&self, cost: f64, now: Instant) -> Option<Duration> {
        if cost > self.capacity {
            return None;
        }
        let available = self.available(now);
        if available >= cost {
            return Some(Duration::ZERO);
        }
        if self.refill_per_sec <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64((cost - available) / self.refill_per_sec))
    }
}
