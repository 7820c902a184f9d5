//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

/// JobDaemon - scheduled job orchestrator
#[derive(Parser)]
#[command(
    name = "jd",
    about = "Scheduled job orchestrator with circuit breaking and rate-limited resource queues",
    version = env!("GIT_DESCRIBE"),
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the scheduler in the foreground until SIGINT/SIGTERM
    Run,

    /// List registered jobs and their next due times
    Jobs {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Validate the job catalog (schedules, dependencies, cycles) and exit
    Check,

    /// Show execution statistics from the history file
    Status {
        /// Restrict to one job
        #[arg(short, long)]
        job: Option<String>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Show recent execution records, newest first
    History {
        /// Restrict to one job
        #[arg(short, long)]
        job: Option<String>,

        /// Number of records to show
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },
}

/// Get the log file path
pub fn get_log_path() -> PathBuf {
    debug!("get_log_path: called");
    let path = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("jobdaemon")
        .join("logs")
        .join("jobdaemon.log");
    debug!(?path, "get_log_path: returning path");
    path
}

/// Generate the after_help text with the file locations in use
pub fn generate_after_help() -> String {
    let mut help = String::new();
    help.push_str("Config is read from ./.jobdaemon.yml, then ");
    match dirs::config_dir() {
        Some(dir) => help.push_str(&format!("{}\n", dir.join("jobdaemon").join("jobdaemon.yml").display())),
        None => help.push_str("the user config dir\n"),
    }
    help.push_str(&format!("Logs are written to: {}\n", get_log_path().display()));
    help
}

/// Output format for status/history commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Table,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            "table" => Ok(Self::Table),
            _ => Err(format!("Unknown format: {}. Use text, json, or table", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
            Self::Table => write!(f, "table"),
        }
    }
}
