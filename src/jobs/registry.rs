use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

use crate::jobs::context::TaskContext;
use crate::jobs::error::{JobError, JobResult};

/// Code run for a queue entry.
///
/// Handlers may run more than once for the same logical schedule and should
/// be idempotent. Any `async fn(TaskContext) -> JobResult<()>` is a handler.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn run(&self, ctx: TaskContext) -> JobResult<()>;
}

#[async_trait]
impl<F, Fut> TaskHandler for F
where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = JobResult<()>> + Send + 'static,
{
    async fn run(&self, ctx: TaskContext) -> JobResult<()> {
        (self)(ctx).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("no task registered under '{0}'")]
    NoSuchTask(String),
}

impl From<RegistryError> for JobError {
    fn from(error: RegistryError) -> Self {
        match error {
            RegistryError::NoSuchTask(name) => JobError::NoSuchTask(name),
        }
    }
}

/// Process-local map from task name to handler.
///
/// Populated at startup; each `add` is a single atomic publish visible to
/// every later lookup.
#[derive(Default)]
pub struct TaskRegistry {
    handlers: DashMap<String, Arc<dyn TaskHandler>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under `name`, replacing any previous handler.
    pub fn add<H>(&self, name: impl Into<String>, handler: H) -> &Self
    where
        H: TaskHandler + 'static,
    {
        self.handlers.insert(name.into(), Arc::new(handler));
        self
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn TaskHandler>, RegistryError> {
        self.handlers
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| RegistryError::NoSuchTask(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Runs the handler registered for the context's task.
    ///
    /// The outer error is the lookup; the inner result is the handler's.
    pub async fn run(&self, ctx: TaskContext) -> Result<JobResult<()>, RegistryError> {
        // Clone out of the map so no shard guard is held across the await.
        let handler = self.get(ctx.task())?;
        Ok(handler.run(ctx).await)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }
}
