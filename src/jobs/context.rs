//! Per-run context handed to task handlers.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::jobs::backend::TaskLogSink;
use crate::jobs::error::JobResult;
use crate::models::QueueEntry;

/// What a handler knows about the run it is executing.
///
/// The worker runs the handler inside [`TaskContext::span`], so plain
/// `tracing` calls from the handler carry `entry_id` and `task`.
#[derive(Clone)]
pub struct TaskContext {
    entry_id: Uuid,
    task: String,
    task_data: Option<String>,
    cancel: CancellationToken,
    span: tracing::Span,
    logs: Arc<dyn TaskLogSink>,
}

impl TaskContext {
    pub fn new(entry: &QueueEntry, cancel: CancellationToken, logs: Arc<dyn TaskLogSink>) -> Self {
        let span = tracing::info_span!("task", entry_id = %entry.id, task = %entry.name);
        Self {
            entry_id: entry.id,
            task: entry.name.clone(),
            task_data: entry.task_data.clone(),
            cancel,
            span,
            logs,
        }
    }

    /// Id of the queue entry being executed.
    pub fn entry_id(&self) -> Uuid {
        self.entry_id
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    /// Free-form payload stored with the queue entry.
    pub fn task_data(&self) -> Option<&str> {
        self.task_data.as_deref()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    /// Appends a record to this entry's task log.
    pub async fn log(&self, value: impl Into<JsonValue>) -> JobResult<()> {
        self.logs.append_log(self.entry_id, value.into()).await?;
        Ok(())
    }
}
