//! Shell command job

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eyre::{Context, Result, eyre};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::breaker::BreakerConfig;
use crate::domain::{JobBody, JobCategory, JobDefinition, JobFailure, JobOutput, Priority, Schedule};
use crate::ratelimit::{RateLimitError, RateLimiter};

/// Characters of stdout/stderr kept in records
const OUTPUT_TAIL: usize = 500;

/// What to do when the rate limiter cannot admit the call in time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnRateLimit {
    /// Record the run as failed
    #[default]
    Fail,
    /// Succeed without running the command
    Skip,
}

/// Rate limit gate in front of a command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitGate {
    /// Limiter key shared by every job calling the same resource
    pub key: String,

    #[serde(default = "default_cost")]
    pub cost: f64,

    #[serde(rename = "on-rate-limit", default)]
    pub on_rate_limit: OnRateLimit,

    /// Skip instead of waiting when this many calls are already queued
    #[serde(rename = "skip-when-queued", default)]
    pub skip_when_queued: Option<usize>,
}

fn default_cost() -> f64 {
    1.0
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_enabled() -> bool {
    true
}

/// A job defined in configuration that runs a shell command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandJobSpec {
    pub name: String,

    pub category: JobCategory,

    #[serde(default)]
    pub priority: Priority,

    #[serde(default)]
    pub description: String,

    pub schedule: Schedule,

    /// Jobs that must succeed earlier the same day
    #[serde(rename = "depends-on", default)]
    pub depends_on: BTreeSet<String>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Passed to `sh -c`
    pub command: String,

    #[serde(rename = "working-dir", default)]
    pub working_dir: Option<PathBuf>,

    #[serde(default)]
    pub env: HashMap<String, String>,

    #[serde(rename = "timeout-secs", default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(rename = "rate-limit", default)]
    pub rate_limit: Option<RateLimitGate>,

    #[serde(default)]
    pub breaker: Option<BreakerConfig>,
}

impl CommandJobSpec {
    /// Build a registrable definition. The limiter is only used if the job
    /// has a rate-limit gate.
    pub fn into_definition(self, limiter: Arc<RateLimiter>) -> JobDefinition {
        let body = Arc::new(CommandJob {
            name: self.name.clone(),
            command: self.command,
            working_dir: self.working_dir,
            env: self.env,
            timeout: Duration::from_secs(self.timeout_secs.max(1)),
            gate: self.rate_limit.map(|gate| (gate, limiter)),
        });

        let mut def = JobDefinition::new(self.name, self.category, self.schedule, body)
            .with_priority(self.priority)
            .with_description(self.description)
            .with_dependencies(self.depends_on);
        if let Some(breaker) = self.breaker {
            def = def.with_breaker(breaker);
        }
        if !self.enabled {
            def = def.disabled();
        }
        def
    }
}

/// Runs `sh -c <command>` with a timeout, optionally behind a rate limit
pub struct CommandJob {
    name: String,
    command: String,
    working_dir: Option<PathBuf>,
    env: HashMap<String, String>,
    timeout: Duration,
    gate: Option<(RateLimitGate, Arc<RateLimiter>)>,
}

fn tail(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim_end();
    let start = text
        .char_indices()
        .rev()
        .nth(OUTPUT_TAIL.saturating_sub(1))
        .map(|(i, _)| i)
        .unwrap_or(0);
    text[start..].to_string()
}

impl CommandJob {
    /// Pass the rate limit gate. Ok(false) means skip this run.
    async fn pass_gate(&self) -> Result<bool> {
        let Some((gate, limiter)) = &self.gate else {
            return Ok(true);
        };

        if let Some(max) = gate.skip_when_queued {
            let depth = limiter.queue_depth(&gate.key).await;
            if depth > max {
                info!(job_name = %self.name, key = %gate.key, depth, "Rate limit queue too deep, skipping run");
                return Ok(false);
            }
        }

        match limiter.acquire(&gate.key, gate.cost).await {
            Ok(()) => Ok(true),
            Err(e @ RateLimitError::Timeout { .. }) if gate.on_rate_limit == OnRateLimit::Skip => {
                warn!(job_name = %self.name, key = %e.key(), error = %e, "Rate limited, skipping run");
                Ok(false)
            }
            Err(e) => Err(e).wrap_err(format!("{} could not pass rate limit", self.name)),
        }
    }
}

#[async_trait]
impl JobBody for CommandJob {
    async fn run(&self) -> Result<JobOutput> {
        debug!(job_name = %self.name, command = %self.command, "CommandJob::run: called");

        if !self.pass_gate().await? {
            return Ok(JobOutput::new().with("skipped", "rate limited"));
        }

        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c").arg(&self.command).envs(&self.env).kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(result) => result.context("Failed to execute command")?,
            Err(_) => return Err(eyre!("Command timed out after {:?}", self.timeout)),
        };
        debug!(job_name = %self.name, status = ?output.status, "CommandJob::run: command completed");

        let exit_code = output.status.code();
        if !output.status.success() {
            let stderr = tail(&output.stderr);
            let code = exit_code.map_or_else(|| "signal".to_string(), |c| c.to_string());
            let message = if stderr.is_empty() {
                format!("{} failed", self.name)
            } else {
                format!("{} failed: {}", self.name, stderr.lines().last().unwrap_or_default())
            };
            let failure = JobFailure::new(message)
                .with("exit_code", exit_code)
                .with("stderr", stderr)
                .with("stdout", tail(&output.stdout));
            return Err(eyre!("Command exited with {}", code)).wrap_err(failure);
        }

        Ok(JobOutput::new()
            .with("exit_code", exit_code.unwrap_or_default())
            .with("stdout", tail(&output.stdout)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{RateLimitConfig, RateLimitsConfig};

    fn spec(command: &str) -> CommandJobSpec {
        CommandJobSpec {
            name: "cmd".to_string(),
            category: JobCategory::Maintenance,
            priority: Priority::Normal,
            description: String::new(),
            schedule: Schedule::daily(3, 0),
            depends_on: BTreeSet::new(),
            enabled: true,
            command: command.to_string(),
            working_dir: None,
            env: HashMap::new(),
            timeout_secs: 5,
            rate_limit: None,
            breaker: None,
        }
    }

    fn limiter() -> Arc<RateLimiter> {
        Arc::new(RateLimiter::new(RateLimitsConfig::default().with_key(
            "api",
            RateLimitConfig::new(1.0, 1.0, Duration::from_secs(3600)).with_max_wait(Duration::from_secs(1)),
        )))
    }

    #[tokio::test]
    async fn test_command_success() {
        let def = spec("echo hello").into_definition(limiter());
        let output = def.body.run().await.unwrap();
        assert_eq!(output.metadata["exit_code"], 0);
        assert_eq!(output.metadata["stdout"], "hello");
    }

    #[tokio::test]
    async fn test_command_failure_carries_stderr() {
        let def = spec("echo 'token expired' >&2; exit 3").into_definition(limiter());
        let err = def.body.run().await.unwrap_err();
        assert_eq!(err.to_string(), "cmd failed: token expired");
        assert!(format!("{:?}", err).contains("exited with 3"));
    }

    #[tokio::test]
    async fn test_failed_command_record_keeps_exit_code() {
        use crate::domain::{JobExecutionRecord, Outcome};

        let def = spec("echo partial; echo 'quota exceeded' >&2; exit 4").into_definition(limiter());
        let err = def.body.run().await.unwrap_err();

        let mut record = JobExecutionRecord::start("cmd", JobCategory::Maintenance, chrono::Utc::now());
        record.finish(Outcome::from_report(&err), Duration::from_millis(5));
        assert_eq!(record.error_summary.as_deref(), Some("cmd failed: quota exceeded"));
        assert_eq!(record.metadata["exit_code"], 4);
        assert_eq!(record.metadata["stderr"], "quota exceeded");
        assert_eq!(record.metadata["stdout"], "partial");
    }

    #[tokio::test]
    async fn test_env_and_working_dir() {
        let temp = tempfile::tempdir().unwrap();
        let mut spec = spec("echo $GREETING; pwd");
        spec.env.insert("GREETING".to_string(), "hi".to_string());
        spec.working_dir = Some(temp.path().to_path_buf());
        let output = spec.into_definition(limiter()).body.run().await.unwrap();
        let stdout = output.metadata["stdout"].as_str().unwrap().to_string();
        assert!(stdout.starts_with("hi\n"));
    }

    #[tokio::test]
    async fn test_timeout() {
        let mut spec = spec("sleep 5");
        spec.timeout_secs = 1;
        let err = spec.into_definition(limiter()).body.run().await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_rate_limit_skip_and_fail() {
        let limiter = limiter();
        let mut skip = spec("true");
        skip.rate_limit = Some(RateLimitGate {
            key: "api".to_string(),
            cost: 1.0,
            on_rate_limit: OnRateLimit::Skip,
            skip_when_queued: None,
        });
        let mut fail = skip.clone();
        fail.rate_limit.as_mut().unwrap().on_rate_limit = OnRateLimit::Fail;

        let skip = skip.into_definition(limiter.clone());
        let fail = fail.into_definition(limiter.clone());

        // First call spends the only token
        let first = skip.body.run().await.unwrap();
        assert!(!first.metadata.contains_key("skipped"));

        let second = skip.body.run().await.unwrap();
        assert_eq!(second.metadata["skipped"], "rate limited");

        let err = fail.body.run().await.unwrap_err();
        assert!(format!("{:?}", err).contains("timed out"));
    }

    #[test]
    fn test_spec_yaml() {
        let yaml = r#"
name: post-thread
category: publishing
priority: high
schedule:
  type: daily
  time: "13:00"
depends-on: [fetch-headlines]
command: ./post.sh
rate-limit:
  key: x-api
  on-rate-limit: skip
breaker:
  failure-threshold: 5
"#;
        let spec: CommandJobSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.priority, Priority::High);
        assert_eq!(spec.schedule, Schedule::daily(13, 0));
        assert!(spec.depends_on.contains("fetch-headlines"));
        assert!(spec.enabled);
        assert_eq!(spec.timeout_secs, 300);
        let gate = spec.rate_limit.unwrap();
        assert_eq!(gate.cost, 1.0);
        assert_eq!(gate.on_rate_limit, OnRateLimit::Skip);
        assert_eq!(spec.breaker.unwrap().cooldown_secs, 900);
    }
}
