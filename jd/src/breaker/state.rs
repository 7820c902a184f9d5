//! Breaker state machine

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::config::BreakerConfig;

/// Circuit position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Breaker bookkeeping for one job.
///
/// `state == Open` implies `consecutive_failures >= failure_threshold`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerState {
    pub consecutive_failures: u32,
    pub state: CircuitState,
    pub opened_at: Option<DateTime<Utc>>,
    pub failure_threshold: u32,
    pub cooldown_secs: u64,
    /// A half-open trial has been dispatched and not yet reported
    pub trial_in_flight: bool,
}

impl BreakerState {
    fn closed(config: &BreakerConfig) -> Self {
        Self {
            consecutive_failures: 0,
            state: CircuitState::Closed,
            opened_at: None,
            failure_threshold: config.failure_threshold,
            cooldown_secs: config.cooldown_secs,
            trial_in_flight: false,
        }
    }

    fn cooldown_elapsed(&self, now: DateTime<Utc>) -> bool {
        match self.opened_at {
            Some(opened) => now.signed_duration_since(opened).num_seconds() >= self.cooldown_secs as i64,
            None => true,
        }
    }
}

/// Circuit breakers for every job, keyed by job name
pub struct CircuitBreaker {
    default: BreakerConfig,
    overrides: RwLock<HashMap<String, BreakerConfig>>,
    states: Mutex<HashMap<String, BreakerState>>,
}

impl CircuitBreaker {
    pub fn new(default: BreakerConfig) -> Self {
        debug!(?default, "CircuitBreaker::new: called");
        Self {
            default,
            overrides: RwLock::new(HashMap::new()),
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Use job-specific thresholds instead of the default
    pub fn configure(&self, job_name: &str, config: BreakerConfig) {
        debug!(%job_name, ?config, "CircuitBreaker::configure: called");
        self.overrides
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job_name.to_string(), config.clone());
        if let Some(state) = self.states.lock().unwrap_or_else(PoisonError::into_inner).get_mut(job_name) {
            state.failure_threshold = config.failure_threshold;
            state.cooldown_secs = config.cooldown_secs;
        }
    }

    pub fn config_for(&self, job_name: &str) -> BreakerConfig {
        self.overrides
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(job_name)
            .cloned()
            .unwrap_or_else(|| self.default.clone())
    }

    /// Whether the job must not be dispatched at `now`.
    ///
    /// An open circuit whose cooldown has passed moves to half-open here and
    /// admits a single trial.
    pub fn is_tripped(&self, job_name: &str, now: DateTime<Utc>) -> bool {
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(state) = states.get_mut(job_name) else {
            return false;
        };
        match state.state {
            CircuitState::Closed => false,
            CircuitState::Open => {
                if state.cooldown_elapsed(now) {
                    info!(%job_name, "Circuit half-open, allowing one trial run");
                    state.state = CircuitState::HalfOpen;
                    state.trial_in_flight = false;
                    false
                } else {
                    true
                }
            }
            CircuitState::HalfOpen => state.trial_in_flight,
        }
    }

    /// Note that the job was dispatched; a half-open circuit now has its trial out
    pub fn on_dispatch(&self, job_name: &str) {
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(state) = states.get_mut(job_name)
            && state.state == CircuitState::HalfOpen
        {
            debug!(%job_name, "CircuitBreaker::on_dispatch: trial in flight");
            state.trial_in_flight = true;
        }
    }

    /// Feed a run's outcome into the breaker
    pub fn record_outcome(&self, job_name: &str, success: bool, now: DateTime<Utc>) {
        debug!(%job_name, success, "CircuitBreaker::record_outcome: called");
        let config = self.config_for(job_name);
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        let state = states
            .entry(job_name.to_string())
            .or_insert_with(|| BreakerState::closed(&config));
        state.trial_in_flight = false;

        if success {
            if state.state != CircuitState::Closed {
                info!(%job_name, "Circuit closed after successful run");
            }
            state.consecutive_failures = 0;
            state.state = CircuitState::Closed;
            state.opened_at = None;
            return;
        }

        state.consecutive_failures += 1;
        match state.state {
            CircuitState::HalfOpen => {
                warn!(%job_name, "Trial run failed, circuit re-opened");
                state.state = CircuitState::Open;
                state.opened_at = Some(now);
            }
            CircuitState::Closed if state.consecutive_failures >= state.failure_threshold => {
                warn!(
                    %job_name,
                    failures = state.consecutive_failures,
                    cooldown_secs = state.cooldown_secs,
                    "Circuit opened"
                );
                state.state = CircuitState::Open;
                state.opened_at = Some(now);
            }
            _ => {}
        }
    }

    /// Force a job's circuit closed
    pub fn reset(&self, job_name: &str) {
        debug!(%job_name, "CircuitBreaker::reset: called");
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(job_name);
    }

    /// Current state of one job (closed if never seen)
    pub fn snapshot(&self, job_name: &str) -> BreakerState {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(job_name)
            .cloned()
            .unwrap_or_else(|| BreakerState::closed(&self.config_for(job_name)))
    }

    /// Names of jobs whose circuit is not closed
    pub fn open_circuits(&self) -> Vec<String> {
        let states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<_> = states
            .iter()
            .filter(|(_, s)| s.state != CircuitState::Closed)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}
