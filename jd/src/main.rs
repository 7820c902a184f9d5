//! JobDaemon - scheduled job orchestrator
//!
//! CLI entry point for running the scheduler and inspecting its history.

use std::fs;
use std::path::PathBuf;

use chrono::Utc;
use clap::{CommandFactory, FromArgMatches};
use colored::Colorize;
use eyre::{Context, Result};
use tracing::{debug, info, warn};

use jobdaemon::cli::{Cli, Command, OutputFormat, generate_after_help};
use jobdaemon::config::Config;
use jobdaemon::domain::{ExecutionStatus, JobExecutionRecord};
use jobdaemon::runtime::Runtime;

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Note: Can't log params here since logging isn't initialized yet
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("jobdaemon")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(log_dir.join("jobdaemon.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Build command with dynamic after_help that shows config and log locations
    let cmd = Cli::command().after_help(generate_after_help());
    let cli = Cli::from_arg_matches(&cmd.get_matches())?;

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());

    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    info!(jobs = config.jobs.len(), "JobDaemon loaded config");

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Some(Command::Run) | None => cmd_run(config).await,
        Some(Command::Jobs { format }) => cmd_jobs(config, format),
        Some(Command::Check) => cmd_check(config),
        Some(Command::Status { job, format }) => cmd_status(config, job.as_deref(), format).await,
        Some(Command::History { job, limit, format }) => cmd_history(config, job.as_deref(), limit, format),
    }
}

/// Run the scheduler until SIGINT/SIGTERM
async fn cmd_run(config: Config) -> Result<()> {
    debug!("cmd_run: called");
    let runtime = Runtime::build(config)?;
    runtime.registry.validate().context("Job catalog is invalid")?;

    let mut scheduler = runtime.scheduler();
    let (shutdown_tx, shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);

    let mut scheduler_handle = tokio::spawn(async move {
        if let Err(e) = scheduler.run(shutdown_rx).await {
            tracing::error!(error = ?e, "Scheduler error");
        }
    });
    info!(jobs = runtime.registry.len(), "Scheduler started");
    println!(
        "JobDaemon running {} jobs. Press Ctrl+C to stop. Logs: {}",
        runtime.registry.len(),
        jobdaemon::cli::get_log_path().display()
    );

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => {
                warn!("SIGINT received");
                let _ = shutdown_tx.send(()).await;
            }
            _ = sigterm.recv() => {
                warn!("SIGTERM received");
                let _ = shutdown_tx.send(()).await;
            }
            _ = &mut scheduler_handle => {
                warn!("Scheduler exited on its own");
                return Ok(());
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                let _ = shutdown_tx.send(()).await;
            }
            _ = &mut scheduler_handle => {
                warn!("Scheduler exited on its own");
                return Ok(());
            }
        }
    }

    info!("JobDaemon shutting down...");
    let _ = scheduler_handle.await;
    info!("JobDaemon stopped");
    Ok(())
}

/// List the job catalog
fn cmd_jobs(config: Config, format: OutputFormat) -> Result<()> {
    debug!(?format, "cmd_jobs: called");
    let runtime = Runtime::build(config)?;
    let jobs = runtime.registry.list();

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&jobs)?),
        OutputFormat::Table => {
            println!(
                "{:<24} {:<12} {:<9} {:<8} {:<28} {}",
                "NAME", "CATEGORY", "PRIORITY", "ENABLED", "SCHEDULE", "NEXT DUE"
            );
            for job in &jobs {
                println!(
                    "{:<24} {:<12} {:<9} {:<8} {:<28} {}",
                    job.name,
                    job.category,
                    job.priority,
                    job.enabled,
                    job.schedule,
                    job.next_due.format("%Y-%m-%d %H:%M")
                );
            }
        }
        OutputFormat::Text => {
            for job in &jobs {
                let name = if job.enabled { job.name.bold() } else { job.name.dimmed() };
                println!("{} ({}, {})", name, job.category, job.priority);
                println!("  schedule: {}", job.schedule);
                println!("  next due: {}", job.next_due.to_rfc3339());
                if !job.dependencies.is_empty() {
                    println!("  depends on: {}", job.dependencies.join(", "));
                }
                if !job.description.is_empty() {
                    println!("  {}", job.description);
                }
            }
        }
    }
    Ok(())
}

/// Validate the job catalog and report
fn cmd_check(config: Config) -> Result<()> {
    debug!("cmd_check: called");
    let runtime = Runtime::build(config)?;
    runtime.registry.validate().context("Job catalog is invalid")?;
    println!("{} {} jobs, catalog is valid", "OK".green(), runtime.registry.len());
    Ok(())
}

/// Execution statistics over the tracker's stats window
async fn cmd_status(config: Config, job: Option<&str>, format: OutputFormat) -> Result<()> {
    debug!(?job, ?format, "cmd_status: called");
    let runtime = Runtime::build(config)?;
    let control = runtime.control();
    let now = Utc::now();

    if let Some(name) = job {
        let status = control.job_status(name, 5, now)?;
        match format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&status)?),
            OutputFormat::Text | OutputFormat::Table => {
                let stats = &status.stats;
                println!("{} ({})", status.info.name.bold(), status.info.category);
                println!("  circuit:      {}", status.breaker.state);
                println!(
                    "  runs:         {} ({} ok, {} failed, {:.2}%)",
                    stats.total, stats.successes, stats.failures, stats.success_rate
                );
                if let Some(avg) = stats.avg_duration_ms {
                    println!("  avg duration: {}ms", avg);
                }
                if let Some(error) = &stats.last_error {
                    println!("  last error:   {}", error.red());
                }
                for record in &status.recent {
                    print_record(record);
                }
            }
        }
        return Ok(());
    }

    let all = control.all_status(0, now);
    let overview = control.overview(now).await;
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({ "jobs": all, "categories": overview.categories }))?
            );
        }
        OutputFormat::Text | OutputFormat::Table => {
            println!(
                "{:<24} {:<10} {:>6} {:>6} {:>8}",
                "JOB", "CIRCUIT", "RUNS", "FAILS", "SUCCESS"
            );
            for status in &all {
                println!(
                    "{:<24} {:<10} {:>6} {:>6} {:>7.2}%",
                    status.info.name,
                    status.breaker.state,
                    status.stats.total,
                    status.stats.failures,
                    status.stats.success_rate
                );
            }
            println!();
            for category in overview.categories.iter().filter(|c| c.total > 0) {
                println!(
                    "{:<12} {} runs, {:.2}% success",
                    category.category, category.total, category.success_rate
                );
            }
        }
    }
    Ok(())
}

/// Recent execution records, newest first
fn cmd_history(config: Config, job: Option<&str>, limit: usize, format: OutputFormat) -> Result<()> {
    debug!(?job, limit, ?format, "cmd_history: called");
    let runtime = Runtime::build(config)?;
    let records: Vec<JobExecutionRecord> = match job {
        Some(name) => runtime.tracker.recent(name, limit),
        None => runtime.tracker.history().into_iter().rev().take(limit).collect(),
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&records)?),
        OutputFormat::Text | OutputFormat::Table => {
            if records.is_empty() {
                println!("No executions recorded in {}", runtime.sink.path().display());
            }
            for record in &records {
                print_record(record);
            }
        }
    }
    Ok(())
}

fn print_record(record: &JobExecutionRecord) {
    let status = match record.status {
        ExecutionStatus::Success => record.status.to_string().green(),
        ExecutionStatus::Failed => record.status.to_string().red(),
        ExecutionStatus::Running => record.status.to_string().yellow(),
    };
    let duration = record.duration_ms.map(|ms| format!("{}ms", ms)).unwrap_or_default();
    print!(
        "  {} {:<24} {:<8} {:>8}",
        record.started_at.format("%Y-%m-%d %H:%M:%S"),
        record.job_name,
        status,
        duration
    );
    match &record.error_summary {
        Some(error) => println!("  {}", error),
        None => println!(),
    }
}
