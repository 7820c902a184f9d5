//! Job definitions and the job body capability

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::category::{JobCategory, Priority};
use super::schedule::Schedule;
use crate::breaker::BreakerConfig;

/// Successful result of a job body, with optional context for the execution record
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobOutput {
    pub metadata: HashMap<String, Value>,
}

impl JobOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to attach a metadata value
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Context for a failing run.
///
/// Attach it with `wrap_err` (or return it as the error itself) and the
/// execution record keeps its metadata next to the error summary.
#[derive(Debug, Clone, Default, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct JobFailure {
    pub message: String,
    pub metadata: HashMap<String, Value>,
}

impl JobFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// The one capability every job exposes: run with no arguments, report success or failure.
///
/// Anything the body needs (clients, rate limiters, paths) is captured when the body
/// is constructed. Errors are `eyre::Report`s so the full cause chain ends up in the
/// execution record.
#[async_trait]
pub trait JobBody: Send + Sync {
    async fn run(&self) -> eyre::Result<JobOutput>;
}

/// Adapter that lets an async closure act as a job body
pub struct FnJob<F>(F);

#[async_trait]
impl<F, Fut> JobBody for FnJob<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = eyre::Result<JobOutput>> + Send,
{
    async fn run(&self) -> eyre::Result<JobOutput> {
        (self.0)().await
    }
}

/// Wrap an async closure as a shareable job body
pub fn job_fn<F, Fut>(f: F) -> Arc<dyn JobBody>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = eyre::Result<JobOutput>> + Send + 'static,
{
    Arc::new(FnJob(f))
}

/// A registered unit of work. Immutable once registered; only the enabled flag
/// is toggled afterwards, and that lives in the registry.
#[derive(Clone)]
pub struct JobDefinition {
    /// Unique key
    pub name: String,

    pub category: JobCategory,

    pub priority: Priority,

    pub description: String,

    pub schedule: Schedule,

    /// Jobs that must succeed within the current epoch before this one is eligible
    pub dependencies: BTreeSet<String>,

    /// Initial enabled flag
    pub enabled: bool,

    /// Per-job breaker settings (falls back to the breaker default)
    pub breaker: Option<BreakerConfig>,

    pub body: Arc<dyn JobBody>,
}

impl JobDefinition {
    pub fn new(name: impl Into<String>, category: JobCategory, schedule: Schedule, body: Arc<dyn JobBody>) -> Self {
        Self {
            name: name.into(),
            category,
            priority: Priority::Normal,
            description: String::new(),
            schedule,
            dependencies: BTreeSet::new(),
            enabled: true,
            breaker: None,
            body,
        }
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_breaker(mut self, breaker: BreakerConfig) -> Self {
        self.breaker = Some(breaker);
        self
    }

    /// Register in the disabled state
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

impl std::fmt::Debug for JobDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobDefinition")
            .field("name", &self.name)
            .field("category", &self.category)
            .field("priority", &self.priority)
            .field("schedule", &self.schedule)
            .field("dependencies", &self.dependencies)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}
