//! Rate limiter configuration

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Budget for one named external resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Max tokens held at once
    pub capacity: f64,

    /// Tokens added per refill period
    #[serde(rename = "refill-tokens")]
    pub refill_tokens: f64,

    /// Refill period in seconds (refill is continuous, this only sets the rate)
    #[serde(rename = "refill-period-secs")]
    pub refill_period_secs: f64,

    /// How long a queued request may wait before failing with a timeout
    #[serde(rename = "max-wait-secs")]
    pub max_wait_secs: u64,

    /// Reject instead of queueing once this many requests are waiting
    #[serde(rename = "max-queue-depth")]
    pub max_queue_depth: Option<usize>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 50.0,
            refill_tokens: 50.0,
            refill_period_secs: 60.0,
            max_wait_secs: 300,
            max_queue_depth: None,
        }
    }
}

impl RateLimitConfig {
    pub fn new(capacity: f64, refill_tokens: f64, refill_period: Duration) -> Self {
        Self {
            capacity,
            refill_tokens,
            refill_period_secs: refill_period.as_secs_f64(),
            ..Default::default()
        }
    }

    /// Tokens per second
    pub fn refill_rate(&self) -> f64 {
        if self.refill_period_secs <= 0.0 {
            0.0
        } else {
            self.refill_tokens / self.refill_period_secs
        }
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait_secs = max_wait.as_secs();
        self
    }

    pub fn with_max_queue_depth(mut self, depth: usize) -> Self {
        self.max_queue_depth = Some(depth);
        self
    }
}

/// All rate-limited resources
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitsConfig {
    /// Limits applied to keys with no explicit entry
    pub default: RateLimitConfig,

    /// Per-key limits
    pub keys: HashMap<String, RateLimitConfig>,

    /// Period of the background drain step in milliseconds
    #[serde(rename = "drain-interval-ms")]
    pub drain_interval_ms: u64,

    /// Window for the recent admit/deny counters in seconds
    #[serde(rename = "telemetry-window-secs")]
    pub telemetry_window_secs: u64,
}

impl Default for RateLimitsConfig {
    fn default() -> Self {
        Self {
            default: RateLimitConfig::default(),
            keys: HashMap::new(),
            drain_interval_ms: 250,
            telemetry_window_secs: 300,
        }
    }
}

impl RateLimitsConfig {
    /// Limits for a key
    pub fn for_key(&self, key: &str) -> &RateLimitConfig {
        self.keys.get(key).unwrap_or(&self.default)
    }

    pub fn with_key(mut self, key: impl Into<String>, config: RateLimitConfig) -> Self {
        self.keys.insert(key.into(), config);
        self
    }

    pub fn drain_interval(&self) -> Duration {
        Duration::from_millis(self.drain_interval_ms.max(1))
    }

    pub fn telemetry_window(&self) -> Duration {
        Duration::from_secs(self.telemetry_window_secs)
    }
}
