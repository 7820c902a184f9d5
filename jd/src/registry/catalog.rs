//! The job catalog

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use super::error::RegistryError;
use super::graph::{DependencyGraph, find_cycle, topological_order};
use crate::breaker::CircuitBreaker;
use crate::domain::{
    ExecutionId, JobBody, JobCategory, JobDefinition, JobExecutionRecord, Outcome, Priority, epoch_of, epoch_start,
};
use crate::tracker::ExecutionTracker;

/// Why a due job was held back
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    BreakerOpen,
    DependencyUnmet(String),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BreakerOpen => write!(f, "circuit breaker open"),
            Self::DependencyUnmet(dep) => write!(f, "waiting on '{}' to succeed today", dep),
        }
    }
}

struct JobEntry {
    definition: JobDefinition,
    enabled: bool,
    /// Fire time of the pending slot
    next_due: DateTime<Utc>,
    in_flight: bool,
    /// Body task of the current run, once spawned
    running: Option<AbortHandle>,
    last_dispatch: Option<DateTime<Utc>>,
    last_skip: Option<SkipReason>,
}

impl JobEntry {
    fn arm(&mut self, from: DateTime<Utc>) {
        self.next_due = self.definition.schedule.next_after(from);
    }
}

/// A job handed out for execution by [`JobRegistry::begin`]
pub struct Dispatch {
    pub job_name: String,
    pub category: JobCategory,
    pub execution_id: ExecutionId,
    pub started_at: DateTime<Utc>,
    body: Arc<dyn JobBody>,
}

impl Dispatch {
    pub fn body(&self) -> Arc<dyn JobBody> {
        self.body.clone()
    }
}

/// Read-only view of one registered job
#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub name: String,
    pub category: JobCategory,
    pub priority: Priority,
    pub description: String,
    pub schedule: String,
    pub dependencies: Vec<String>,
    pub enabled: bool,
    pub in_flight: bool,
    pub next_due: DateTime<Utc>,
    pub last_dispatch: Option<DateTime<Utc>>,
}

/// Every known job, with the breaker and tracker composed around each run.
///
/// Jobs are registered at startup and never removed. Only the enabled flag
/// and the scheduling bookkeeping change afterwards.
pub struct JobRegistry {
    jobs: RwLock<BTreeMap<String, JobEntry>>,
    /// Position of each job in dependency order
    order: RwLock<HashMap<String, usize>>,
    breaker: Arc<CircuitBreaker>,
    tracker: Arc<ExecutionTracker>,
}

impl JobRegistry {
    pub fn new(breaker: Arc<CircuitBreaker>, tracker: Arc<ExecutionTracker>) -> Self {
        debug!("JobRegistry::new: called");
        Self {
            jobs: RwLock::new(BTreeMap::new()),
            order: RwLock::new(HashMap::new()),
            breaker,
            tracker,
        }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn tracker(&self) -> &Arc<ExecutionTracker> {
        &self.tracker
    }

    /// Register a job, arming its schedule from now
    pub fn register(&self, definition: JobDefinition) -> Result<(), RegistryError> {
        self.register_at(definition, Utc::now())
    }

    /// Register a job, arming its schedule from `now`
    pub fn register_at(&self, definition: JobDefinition, now: DateTime<Utc>) -> Result<(), RegistryError> {
        let name = definition.name.clone();
        debug!(%name, schedule = %definition.schedule, "JobRegistry::register: called");

        definition
            .schedule
            .validate()
            .map_err(|reason| RegistryError::InvalidSchedule {
                job: name.clone(),
                reason,
            })?;

        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        if jobs.contains_key(&name) {
            return Err(RegistryError::DuplicateJob(name));
        }

        let order = {
            let mut graph: DependencyGraph = jobs
                .iter()
                .map(|(n, e)| (n.as_str(), &e.definition.dependencies))
                .collect();
            graph.insert(name.as_str(), &definition.dependencies);
            topological_order(&graph).map_err(|path| RegistryError::CyclicDependency { path })?
        };

        if let Some(config) = &definition.breaker {
            self.breaker.configure(&name, config.clone());
        }

        let mut entry = JobEntry {
            enabled: definition.enabled,
            definition,
            next_due: now,
            in_flight: false,
            running: None,
            last_dispatch: None,
            last_skip: None,
        };
        entry.arm(now);
        info!(
            %name,
            category = %entry.definition.category,
            schedule = %entry.definition.schedule,
            next_due = %entry.next_due,
            "Registered job"
        );
        jobs.insert(name, entry);

        *self.order.write().unwrap_or_else(PoisonError::into_inner) =
            order.into_iter().enumerate().map(|(i, n)| (n, i)).collect();
        Ok(())
    }

    /// Check the catalog as a whole: every dependency names a registered job
    /// and there are no cycles
    pub fn validate(&self) -> Result<(), RegistryError> {
        debug!("JobRegistry::validate: called");
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        for (name, entry) in jobs.iter() {
            if let Some(dep) = entry.definition.dependencies.iter().find(|d| !jobs.contains_key(*d)) {
                return Err(RegistryError::UnknownDependency {
                    job: name.clone(),
                    dependency: dep.clone(),
                });
            }
        }
        let graph: DependencyGraph = jobs
            .iter()
            .map(|(n, e)| (n.as_str(), &e.definition.dependencies))
            .collect();
        match find_cycle(&graph) {
            Some(path) => Err(RegistryError::CyclicDependency { path }),
            None => Ok(()),
        }
    }

    pub fn enable(&self, name: &str) -> Result<(), RegistryError> {
        self.enable_at(name, Utc::now())
    }

    /// Enable a job. A previously disabled job re-arms from `now` so slots
    /// missed while disabled do not fire.
    pub fn enable_at(&self, name: &str, now: DateTime<Utc>) -> Result<(), RegistryError> {
        debug!(%name, "JobRegistry::enable: called");
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        let entry = jobs
            .get_mut(name)
            .ok_or_else(|| RegistryError::UnknownJob(name.to_string()))?;
        if !entry.enabled {
            entry.enabled = true;
            entry.arm(now);
            info!(%name, next_due = %entry.next_due, "Job enabled");
        }
        Ok(())
    }

    pub fn disable(&self, name: &str) -> Result<(), RegistryError> {
        debug!(%name, "JobRegistry::disable: called");
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        let entry = jobs
            .get_mut(name)
            .ok_or_else(|| RegistryError::UnknownJob(name.to_string()))?;
        if entry.enabled {
            entry.enabled = false;
            info!(%name, "Job disabled");
        }
        Ok(())
    }

    pub fn is_enabled(&self, name: &str) -> Option<bool> {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(|e| e.enabled)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner).contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Jobs currently executing
    pub fn in_flight_count(&self) -> usize {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|e| e.in_flight)
            .count()
    }

    /// A view of one job
    pub fn info(&self, name: &str) -> Option<JobInfo> {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(Self::to_info)
    }

    /// A view of every job, by name
    pub fn list(&self) -> Vec<JobInfo> {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(Self::to_info)
            .collect()
    }

    fn to_info(entry: &JobEntry) -> JobInfo {
        let def = &entry.definition;
        JobInfo {
            name: def.name.clone(),
            category: def.category,
            priority: def.priority,
            description: def.description.clone(),
            schedule: def.schedule.to_string(),
            dependencies: def.dependencies.iter().cloned().collect(),
            enabled: entry.enabled,
            in_flight: entry.in_flight,
            next_due: entry.next_due,
            last_dispatch: entry.last_dispatch,
        }
    }

    /// Whether `dep` succeeded in the epoch containing `now`
    fn dependency_met(&self, dep: &str, now: DateTime<Utc>) -> bool {
        self.tracker
            .last_success(dep)
            .is_some_and(|t| epoch_of(t) == epoch_of(now))
    }

    /// Names of jobs to dispatch at `now`, highest priority first, then in
    /// dependency order, then by name.
    ///
    /// A job is due when it is enabled, not already running, its pending slot
    /// has arrived, its breaker is not tripped, and each dependency has
    /// succeeded today. Held-back jobs keep their slot until the epoch ends.
    pub fn due_jobs(&self, now: DateTime<Utc>) -> Vec<String> {
        debug!(%now, "JobRegistry::due_jobs: called");
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        let today = epoch_of(now);
        let mut due = Vec::new();

        for (name, entry) in jobs.iter_mut() {
            if !entry.enabled || entry.in_flight {
                continue;
            }

            if epoch_of(entry.next_due) < today && entry.next_due <= now {
                debug!(%name, missed = %entry.next_due, "JobRegistry::due_jobs: abandoning slot from a past epoch");
                entry.arm(epoch_start(today) - Duration::seconds(1));
                entry.last_skip = None;
            }
            if entry.next_due > now {
                continue;
            }

            let reason = if self.breaker.is_tripped(name, now) {
                Some(SkipReason::BreakerOpen)
            } else {
                entry
                    .definition
                    .dependencies
                    .iter()
                    .find(|dep| !self.dependency_met(dep, now))
                    .map(|dep| SkipReason::DependencyUnmet(dep.clone()))
            };

            match reason {
                Some(reason) => {
                    if entry.last_skip.as_ref() != Some(&reason) {
                        info!(%name, %reason, "Skipping due job");
                        entry.last_skip = Some(reason);
                    }
                }
                None => {
                    entry.last_skip = None;
                    due.push((entry.definition.priority, name.clone()));
                }
            }
        }
        drop(jobs);

        let order = self.order.read().unwrap_or_else(PoisonError::into_inner);
        due.sort_by(|(pa, a), (pb, b)| {
            pb.cmp(pa)
                .then_with(|| order.get(a).cmp(&order.get(b)))
                .then_with(|| a.cmp(b))
        });
        debug!(count = due.len(), "JobRegistry::due_jobs: complete");
        due.into_iter().map(|(_, name)| name).collect()
    }

    /// Mark a job as running and open its execution record.
    ///
    /// The next slot is armed from `now`, so missed slots collapse into this
    /// one dispatch. Returns None if the job is unknown or already running.
    pub fn begin(&self, name: &str, now: DateTime<Utc>) -> Option<Dispatch> {
        debug!(%name, "JobRegistry::begin: called");
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        let entry = jobs.get_mut(name)?;
        if entry.in_flight {
            warn!(%name, "Job already running, not dispatching again");
            return None;
        }
        entry.in_flight = true;
        entry.last_dispatch = Some(now);
        entry.arm(now);

        self.breaker.on_dispatch(name);
        let execution_id = self.tracker.start_at(name, entry.definition.category, now);
        info!(%name, %execution_id, next_due = %entry.next_due, "Dispatching job");

        Some(Dispatch {
            job_name: name.to_string(),
            category: entry.definition.category,
            execution_id,
            started_at: now,
            body: entry.definition.body.clone(),
        })
    }

    /// Run a dispatched job's body in its own task and record the result.
    ///
    /// Errors and panics are contained in the execution record.
    pub async fn execute(&self, dispatch: Dispatch) -> Option<JobExecutionRecord> {
        let body = dispatch.body();
        let clock = tokio::time::Instant::now();
        let task = tokio::spawn(async move { body.run().await });
        if let Some(entry) = self
            .jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&dispatch.job_name)
        {
            entry.running = Some(task.abort_handle());
        }
        let outcome = match task.await {
            Ok(Ok(output)) => Outcome::Success {
                metadata: output.metadata,
            },
            Ok(Err(e)) => {
                error!(job_name = %dispatch.job_name, error = %e, "Job failed");
                Outcome::from_report(&e)
            }
            Err(join_err) => {
                let summary = if join_err.is_panic() {
                    "job panicked"
                } else {
                    "job cancelled"
                };
                error!(job_name = %dispatch.job_name, error = %join_err, "{}", summary);
                Outcome::Failed {
                    summary: summary.to_string(),
                    detail: Some(join_err.to_string()),
                    metadata: HashMap::new(),
                }
            }
        };
        let elapsed = Duration::from_std(clock.elapsed()).unwrap_or_else(|_| Duration::zero());
        let now = dispatch.started_at + elapsed;
        self.finish(dispatch, outcome, now).await
    }

    /// Abort the body of a running job.
    ///
    /// `execute` still completes the record, as a failed "job cancelled" run.
    /// Returns false if the job has no spawned body.
    pub fn cancel(&self, name: &str) -> bool {
        debug!(%name, "JobRegistry::cancel: called");
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        match jobs.get(name).and_then(|e| e.running.as_ref()) {
            Some(handle) => {
                warn!(%name, "Cancelling running job");
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Close the execution record, feed the breaker and release the job
    pub async fn finish(&self, dispatch: Dispatch, outcome: Outcome, now: DateTime<Utc>) -> Option<JobExecutionRecord> {
        debug!(job_name = %dispatch.job_name, status = %outcome.status(), "JobRegistry::finish: called");
        let success = outcome.is_success();
        let record = self.tracker.complete(dispatch.execution_id, outcome).await;
        self.breaker.record_outcome(&dispatch.job_name, success, now);

        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = jobs.get_mut(&dispatch.job_name) {
            entry.in_flight = false;
            entry.running = None;
        }
        if let Some(record) = &record {
            info!(
                job_name = %record.job_name,
                status = %record.status,
                duration_ms = record.duration_ms.unwrap_or_default(),
                "Job finished"
            );
        }
        record
    }
}
