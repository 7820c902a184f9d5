//! Execution tracker configuration

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// How much history is kept and where it is exported
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Records retained in memory; oldest completed records go first
    #[serde(rename = "max-history")]
    pub max_history: usize,

    /// Directory for the JSONL export (None = `<data-local>/jobdaemon/history`)
    #[serde(rename = "history-dir")]
    pub history_dir: Option<PathBuf>,

    /// Trailing window for success-rate statistics
    #[serde(rename = "stats-window-hours")]
    pub stats_window_hours: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_history: 1000,
            history_dir: None,
            stats_window_hours: 24,
        }
    }
}

impl TrackerConfig {
    /// Resolved export directory
    pub fn history_dir(&self) -> eyre::Result<PathBuf> {
        match &self.history_dir {
            Some(dir) => Ok(dir.clone()),
            None => {
                let base = dirs::data_local_dir().ok_or_else(|| eyre::eyre!("Could not determine data directory"))?;
                Ok(base.join("jobdaemon").join("history"))
            }
        }
    }

    pub fn stats_window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.stats_window_hours as i64)
    }
}
