//! Circuit breaker configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Thresholds for one job's breaker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit
    #[serde(rename = "failure-threshold")]
    pub failure_threshold: u32,

    /// Seconds an open circuit waits before allowing a trial run
    #[serde(rename = "cooldown-secs")]
    pub cooldown_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown_secs: 900,
        }
    }
}

impl BreakerConfig {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            cooldown_secs: cooldown.as_secs(),
        }
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}
