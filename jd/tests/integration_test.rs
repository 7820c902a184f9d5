//! Integration tests for JobDaemon
//!
//! These tests drive the scheduler, registry, breaker, tracker and rate
//! limiter together, and smoke-test the `jd` binary.

use std::collections::{BTreeSet, HashMap};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use assert_cmd::Command;
use chrono::{DateTime, TimeZone, Utc};
use predicates::prelude::*;
use tempfile::TempDir;

use jobdaemon::breaker::{BreakerConfig, CircuitBreaker, CircuitState};
use jobdaemon::domain::{ExecutionStatus, JobCategory, Priority, Schedule};
use jobdaemon::jobs::{CommandJobSpec, OnRateLimit, RateLimitGate};
use jobdaemon::ratelimit::{RateLimitConfig, RateLimiter, RateLimitsConfig};
use jobdaemon::registry::JobRegistry;
use jobdaemon::scheduler::{Scheduler, SchedulerConfig};
use jobdaemon::tracker::{ExecutionTracker, JobStats, JsonlRecordSink, TrackerConfig, read_records};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 4, 1, 10, 0, 0).unwrap()
}

fn command_spec(name: &str, command: &str) -> CommandJobSpec {
    CommandJobSpec {
        name: name.to_string(),
        category: JobCategory::Ingestion,
        priority: Priority::Normal,
        description: String::new(),
        schedule: Schedule::every(Duration::from_secs(60)),
        depends_on: BTreeSet::new(),
        enabled: true,
        command: command.to_string(),
        working_dir: None,
        env: HashMap::new(),
        timeout_secs: 10,
        rate_limit: None,
        breaker: None,
    }
}

struct Harness {
    _temp: TempDir,
    sink: Arc<JsonlRecordSink>,
    limiter: Arc<RateLimiter>,
    registry: Arc<JobRegistry>,
}

fn harness(limits: RateLimitsConfig) -> Harness {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let sink = Arc::new(JsonlRecordSink::new(temp.path()));
    let tracker = Arc::new(ExecutionTracker::new(TrackerConfig::default()).with_sink(sink.clone()));
    let breaker = Arc::new(CircuitBreaker::new(BreakerConfig::default()));
    Harness {
        _temp: temp,
        sink,
        limiter: Arc::new(RateLimiter::new(limits)),
        registry: Arc::new(JobRegistry::new(breaker, tracker)),
    }
}

// =============================================================================
// Scheduler + Breaker + Tracker
// =============================================================================

#[tokio::test]
async fn test_failing_command_trips_breaker_without_affecting_others() {
    let h = harness(RateLimitsConfig::default());

    let mut bad = command_spec("bad", "echo 'upstream 503' >&2; exit 1");
    bad.breaker = Some(BreakerConfig::new(2, Duration::from_secs(900)));
    h.registry
        .register_at(command_spec("good", "echo ok").into_definition(h.limiter.clone()), t0())
        .unwrap();
    h.registry.register_at(bad.into_definition(h.limiter.clone()), t0()).unwrap();

    let mut scheduler = Scheduler::new(SchedulerConfig::default(), h.registry.clone());

    let mut dispatched = Vec::new();
    for i in 1..=3 {
        let now = t0() + chrono::Duration::seconds(61 * i);
        dispatched.push(scheduler.tick_at(now).await);
        assert!(scheduler.wait_for_idle(Duration::from_secs(10)).await);
    }

    assert_eq!(dispatched[0], vec!["bad", "good"]);
    assert_eq!(dispatched[1], vec!["bad", "good"]);
    // Two consecutive failures opened the circuit
    assert_eq!(dispatched[2], vec!["good"]);
    assert_eq!(h.registry.breaker().snapshot("bad").state, CircuitState::Open);
    assert_eq!(h.registry.breaker().snapshot("good").state, CircuitState::Closed);

    // Every completed record reached the JSONL export
    let exported = read_records(h.sink.path()).unwrap();
    assert_eq!(exported.len(), 5);

    let bad_stats = JobStats::from_records("bad", &exported);
    assert_eq!(bad_stats.failures, 2);
    assert_eq!(bad_stats.last_error.as_deref(), Some("bad failed: upstream 503"));

    let good_stats = JobStats::from_records("good", &exported);
    assert_eq!(good_stats.successes, 3);
    assert_eq!(good_stats.success_rate, 100.0);
}

#[tokio::test]
async fn test_dependency_waits_for_same_day_success() {
    let h = harness(RateLimitsConfig::default());

    let mut fetch = command_spec("fetch", "true");
    fetch.schedule = Schedule::daily(12, 0);
    let mut post = command_spec("post", "true");
    post.category = JobCategory::Publishing;
    post.schedule = Schedule::daily(11, 0);
    post.depends_on.insert("fetch".to_string());

    h.registry.register_at(fetch.into_definition(h.limiter.clone()), t0()).unwrap();
    h.registry.register_at(post.into_definition(h.limiter.clone()), t0()).unwrap();

    let mut scheduler = Scheduler::new(SchedulerConfig::default(), h.registry.clone());

    // 11:00: post is due but fetch has not succeeded today
    let at_eleven = Utc.with_ymd_and_hms(2024, 4, 1, 11, 0, 30).unwrap();
    assert!(scheduler.tick_at(at_eleven).await.is_empty());

    // 12:00: fetch runs, post follows on the next tick the same day
    let at_noon = Utc.with_ymd_and_hms(2024, 4, 1, 12, 0, 30).unwrap();
    assert_eq!(scheduler.tick_at(at_noon).await, vec!["fetch"]);
    assert!(scheduler.wait_for_idle(Duration::from_secs(10)).await);

    let after_noon = Utc.with_ymd_and_hms(2024, 4, 1, 12, 1, 30).unwrap();
    assert_eq!(scheduler.tick_at(after_noon).await, vec!["post"]);
    assert!(scheduler.wait_for_idle(Duration::from_secs(10)).await);

    let history = h.registry.tracker().history();
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|r| r.status == ExecutionStatus::Success));
}

// =============================================================================
// Rate limiter shared between jobs
// =============================================================================

#[tokio::test]
async fn test_jobs_share_rate_limited_key() {
    let limits = RateLimitsConfig::default().with_key(
        "x-api",
        RateLimitConfig::new(1.0, 1.0, Duration::from_secs(3600)).with_max_wait(Duration::from_millis(300)),
    );
    let h = harness(limits);

    for name in ["post-a", "post-b"] {
        let mut spec = command_spec(name, "true");
        spec.rate_limit = Some(RateLimitGate {
            key: "x-api".to_string(),
            cost: 1.0,
            on_rate_limit: OnRateLimit::Fail,
            skip_when_queued: None,
        });
        h.registry
            .register_at(spec.into_definition(h.limiter.clone()), t0())
            .unwrap();
    }

    let mut scheduler = Scheduler::new(SchedulerConfig::default(), h.registry.clone()).with_limiter(h.limiter.clone());
    let dispatched = scheduler.tick_at(t0() + chrono::Duration::seconds(61)).await;
    assert_eq!(dispatched.len(), 2);
    assert!(scheduler.wait_for_idle(Duration::from_secs(10)).await);

    let history = h.registry.tracker().history();
    let failed: Vec<_> = history
        .iter()
        .filter(|r| r.status == ExecutionStatus::Failed)
        .collect();
    assert_eq!(failed.len(), 1);
    assert!(
        failed[0]
            .error_summary
            .as_deref()
            .unwrap_or_default()
            .contains("could not pass rate limit")
    );

    let telemetry = h.limiter.telemetry("x-api").await;
    assert_eq!(telemetry.stats.total_timed_out, 1);
}

// =============================================================================
// Scheduler run loop
// =============================================================================

#[tokio::test]
async fn test_run_loop_stops_on_shutdown_signal() {
    let h = harness(RateLimitsConfig::default());
    h.registry
        .register_at(command_spec("noop", "true").into_definition(h.limiter.clone()), t0())
        .unwrap();

    let config = SchedulerConfig {
        tick_interval_ms: 20,
        ..Default::default()
    };
    let mut scheduler = Scheduler::new(config, h.registry.clone()).with_limiter(h.limiter.clone());
    let (shutdown_tx, shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);

    let handle = tokio::spawn(async move {
        let result = scheduler.run(shutdown_rx).await;
        (result, scheduler.ticks())
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown_tx.send(()).await.expect("Failed to send shutdown");

    let (result, ticks) = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("Scheduler should shut down")
        .unwrap();
    assert!(result.is_ok());
    assert!(ticks >= 1);
}

// =============================================================================
// CLI
// =============================================================================

fn write_config(dir: &TempDir, body: &str) -> std::path::PathBuf {
    let path = dir.path().join("jobdaemon.yml");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "tracker:\n  history-dir: {}", dir.path().join("history").display()).unwrap();
    write!(file, "{}", body).unwrap();
    path
}

#[test]
fn test_cli_version() {
    Command::cargo_bin("jd").unwrap().arg("--version").assert().success();
}

#[test]
fn test_cli_check_valid_catalog() {
    let temp = TempDir::new().unwrap();
    let config = write_config(
        &temp,
        r#"
jobs:
  - name: fetch
    category: ingestion
    schedule: { type: hourly, minute: 5 }
    command: "true"
  - name: post
    category: publishing
    schedule: { type: daily, time: "13:00" }
    depends-on: [fetch]
    command: "true"
"#,
    );

    Command::cargo_bin("jd")
        .unwrap()
        .arg("-c")
        .arg(&config)
        .arg("check")
        .assert()
        .success()
        .stdout(predicate::str::contains("4 jobs, catalog is valid"));
}

#[test]
fn test_cli_check_reports_cycle() {
    let temp = TempDir::new().unwrap();
    let config = write_config(
        &temp,
        r#"
jobs:
  - name: a
    category: generation
    schedule: { type: hourly, minute: 0 }
    depends-on: [b]
    command: "true"
  - name: b
    category: generation
    schedule: { type: hourly, minute: 0 }
    depends-on: [a]
    command: "true"
"#,
    );

    Command::cargo_bin("jd")
        .unwrap()
        .arg("-c")
        .arg(&config)
        .arg("check")
        .assert()
        .failure()
        .stderr(predicate::str::contains("cyclic dependency"));
}

#[test]
fn test_cli_jobs_json_lists_catalog() {
    let temp = TempDir::new().unwrap();
    let config = write_config(&temp, "prune:\n  enabled: false\n");

    Command::cargo_bin("jd")
        .unwrap()
        .arg("-c")
        .arg(&config)
        .args(["jobs", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"name\": \"heartbeat\""));
}

#[test]
fn test_cli_history_empty() {
    let temp = TempDir::new().unwrap();
    let config = write_config(&temp, "");

    Command::cargo_bin("jd")
        .unwrap()
        .arg("-c")
        .arg(&config)
        .arg("history")
        .assert()
        .success()
        .stdout(predicate::str::contains("No executions recorded"));
}
