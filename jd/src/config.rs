//! JobDaemon configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::breaker::BreakerConfig;
use crate::domain::Schedule;
use crate::jobs::CommandJobSpec;
use crate::ratelimit::RateLimitsConfig;
use crate::scheduler::SchedulerConfig;
use crate::tracker::TrackerConfig;

/// Main JobDaemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// Scheduler loop settings
    pub scheduler: SchedulerConfig,

    /// Default breaker thresholds (jobs may override)
    pub breaker: BreakerConfig,

    /// Execution history settings
    pub tracker: TrackerConfig,

    /// Rate-limited resources
    #[serde(rename = "rate-limits")]
    pub rate_limits: RateLimitsConfig,

    /// Built-in heartbeat job
    pub heartbeat: HeartbeatConfig,

    /// Built-in history retention job
    pub prune: PruneConfig,

    /// Command jobs
    pub jobs: Vec<CommandJobSpec>,
}

/// Only the fields needed before logging is set up
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LogLevelOnly {
    #[serde(rename = "log-level")]
    log_level: Option<String>,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        for candidate in Self::candidates() {
            if candidate.exists() {
                match Self::load_from_file(&candidate) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", candidate.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Project-local config, then user config
    fn candidates() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(".jobdaemon.yml")];
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("jobdaemon").join("jobdaemon.yml"));
        }
        paths
    }

    /// Read just the log level, ignoring any errors (logging is not up yet)
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let path = match config_path {
            Some(path) => path.clone(),
            None => Self::candidates().into_iter().find(|p| p.exists())?,
        };
        let content = fs::read_to_string(path).ok()?;
        serde_yaml::from_str::<LogLevelOnly>(&content).ok()?.log_level
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Heartbeat job settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub enabled: bool,

    /// Seconds between heartbeats
    #[serde(rename = "every-secs")]
    pub every_secs: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            every_secs: 1800,
        }
    }
}

impl HeartbeatConfig {
    pub fn every(&self) -> Duration {
        Duration::from_secs(self.every_secs.max(1))
    }
}

/// History retention job settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PruneConfig {
    pub enabled: bool,

    /// Days of exported records to keep
    #[serde(rename = "retain-days")]
    pub retain_days: u32,

    pub schedule: Schedule,
}

impl Default for PruneConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retain_days: 30,
            schedule: Schedule::daily(3, 0),
        }
    }
}
