//! The scheduler control loop

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use eyre::{Context, Result};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::config::SchedulerConfig;
use crate::domain::JobExecutionRecord;
use crate::ratelimit::RateLimiter;
use crate::registry::JobRegistry;

/// How long cancelled jobs get to close their records before being abandoned
const CANCEL_WAIT: Duration = Duration::from_secs(1);

/// Whether the loop is still dispatching
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Active,
    Stopped,
}

impl std::fmt::Display for LoopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Drives the registry: one tick per interval, one task per dispatched job
pub struct Scheduler {
    config: SchedulerConfig,
    registry: Arc<JobRegistry>,
    limiter: Option<Arc<RateLimiter>>,
    semaphore: Arc<Semaphore>,
    /// Running job tasks by job name
    tasks: HashMap<String, JoinHandle<Option<JobExecutionRecord>>>,
    state: LoopState,
    ticks: u64,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, registry: Arc<JobRegistry>) -> Self {
        debug!(
            tick_interval_ms = config.tick_interval_ms,
            max_concurrent = config.max_concurrent_jobs,
            "Scheduler::new: called"
        );
        Self {
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1))),
            config,
            registry,
            limiter: None,
            tasks: HashMap::new(),
            state: LoopState::Active,
            ticks: 0,
        }
    }

    /// Run the limiter's drain step alongside the loop
    pub fn with_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Names of jobs with a live task
    pub fn running_jobs(&self) -> Vec<String> {
        let mut names: Vec<_> = self.tasks.keys().cloned().collect();
        names.sort();
        names
    }

    /// Tick until a shutdown signal arrives, then drain in-flight jobs
    pub async fn run(&mut self, mut shutdown_rx: mpsc::Receiver<()>) -> Result<()> {
        debug!("Scheduler::run: called");
        self.registry.validate().context("Job catalog is invalid")?;
        info!(jobs = self.registry.len(), "Scheduler starting");

        let drainer = self.limiter.as_ref().map(|limiter| limiter.spawn_drainer());

        let mut interval = tokio::time::interval(self.config.tick_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }

                _ = shutdown_rx.recv() => {
                    debug!("Scheduler::run: shutdown signal received");
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        self.shutdown().await;
        if let Some(drainer) = drainer {
            drainer.abort();
        }
        debug!("Scheduler::run: complete");
        Ok(())
    }

    /// One tick at the current time
    pub async fn tick(&mut self) -> Vec<String> {
        self.tick_at(Utc::now()).await
    }

    /// Reap finished tasks, then dispatch every due job that fits under the
    /// concurrency ceiling. Returns the names dispatched.
    pub async fn tick_at(&mut self, now: DateTime<Utc>) -> Vec<String> {
        self.ticks += 1;
        debug!(tick = self.ticks, %now, "Scheduler::tick: called");
        self.reap_completed_tasks().await;

        if self.state == LoopState::Stopped {
            debug!("Scheduler::tick: stopped, not dispatching");
            return Vec::new();
        }

        let mut dispatched = Vec::new();
        for name in self.registry.due_jobs(now) {
            if let Some(previous) = self.tasks.remove(&name) {
                debug!(%name, "Scheduler::tick: awaiting previous task");
                Self::settle(&name, previous).await;
            }
            let Ok(permit) = self.semaphore.clone().try_acquire_owned() else {
                debug!(running = self.tasks.len(), "Scheduler::tick: concurrency ceiling reached");
                break;
            };
            let Some(dispatch) = self.registry.begin(&name, now) else {
                continue;
            };

            let registry = self.registry.clone();
            let handle = tokio::spawn(async move {
                let _permit = permit;
                registry.execute(dispatch).await
            });
            self.tasks.insert(name.clone(), handle);
            dispatched.push(name);
        }

        if !dispatched.is_empty() {
            debug!(?dispatched, "Scheduler::tick: dispatched jobs");
        }
        dispatched
    }

    async fn reap_completed_tasks(&mut self) {
        let finished: Vec<String> = self
            .tasks
            .iter()
            .filter(|(_, handle)| handle.is_finished())
            .map(|(name, _)| name.clone())
            .collect();

        for name in finished {
            if let Some(handle) = self.tasks.remove(&name) {
                Self::settle(&name, handle).await;
            }
        }
    }

    async fn settle(name: &str, handle: JoinHandle<Option<JobExecutionRecord>>) {
        match handle.await {
            Ok(Some(record)) => {
                debug!(%name, status = %record.status, "Scheduler::settle: job task done");
            }
            Ok(None) => {
                debug!(%name, "Scheduler::settle: job task done without a record");
            }
            Err(e) if e.is_cancelled() => {
                debug!(%name, "Scheduler::settle: job task aborted");
            }
            Err(e) => {
                error!(%name, error = %e, "Job task panicked");
            }
        }
    }

    /// Wait until no job tasks remain or `timeout` passes. Returns true when idle.
    pub async fn wait_for_idle(&mut self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            self.reap_completed_tasks().await;
            if self.tasks.is_empty() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Stop dispatching and give in-flight jobs the grace period to finish.
    ///
    /// Jobs still running afterwards are cancelled and their records closed
    /// as failed.
    pub async fn shutdown(&mut self) {
        debug!(task_count = self.tasks.len(), "Scheduler::shutdown: called");
        self.state = LoopState::Stopped;
        info!("Shutting down scheduler with {} running jobs", self.tasks.len());

        let grace = self.config.shutdown_grace();
        if !self.wait_for_idle(grace).await {
            warn!("Cancelling {} jobs still running after {:?}", self.tasks.len(), grace);
            let deadline = tokio::time::Instant::now() + CANCEL_WAIT;
            loop {
                let pending: Vec<String> = self.tasks.keys().cloned().collect();
                for name in &pending {
                    self.registry.cancel(name);
                }
                self.reap_completed_tasks().await;
                if self.tasks.is_empty() || tokio::time::Instant::now() >= deadline {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            for (name, handle) in self.tasks.drain() {
                warn!(%name, "Abandoning job task that did not stop");
                handle.abort();
            }
        }
        info!("Scheduler shutdown complete");
    }
}
