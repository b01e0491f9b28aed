use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::jobs::backend::QueueBackend;
use crate::jobs::context::TaskContext;
use crate::jobs::error::{JobError, JobResult};
use crate::jobs::registry::TaskHandler;
use crate::jobs::time_before;

pub const LOG_RETENTION: &str = "log_retention";

/// Deletes `complete` entries whose `run_at` is older than the retention
/// window, one keyset page at a time. Their logs cascade.
pub struct LogRetentionTask {
    queue: Arc<dyn QueueBackend>,
    retention: Duration,
    page_size: i64,
}

impl LogRetentionTask {
    pub fn new(queue: Arc<dyn QueueBackend>, retention: Duration, page_size: i64) -> Self {
        Self {
            queue,
            retention,
            page_size: page_size.max(1),
        }
    }
}

#[async_trait]
impl TaskHandler for LogRetentionTask {
    async fn run(&self, ctx: TaskContext) -> JobResult<()> {
        let cutoff = time_before(jiff::Timestamp::now(), self.retention);
        let mut after = None;
        let mut deleted = 0usize;

        loop {
            if ctx.is_cancelled() {
                tracing::info!(deleted, "Retention sweep interrupted");
                return Err(JobError::Cancelled);
            }

            match self.queue.purge_completed(cutoff, after, self.page_size).await {
                Ok(page) => {
                    deleted += page.deleted;
                    after = page.last_id.or(after);
                    if (page.deleted as i64) < self.page_size {
                        break;
                    }
                }
                Err(e) => {
                    let last_id = after.map(|id| id.to_string()).unwrap_or_else(|| "none".to_string());
                    tracing::error!(deleted, last_id = %last_id, error = %e, "Retention sweep halted");
                    return Err(JobError::failed(format!(
                        "retention sweep halted after {} deletions, last processed id {}: {}",
                        deleted, last_id, e
                    )));
                }
            }
        }

        tracing::info!(deleted, %cutoff, "Retention sweep finished");
        ctx.log(json!({ "deleted": deleted, "cutoff": cutoff.to_string() }))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::memory::MemoryBackend;
    use crate::models::QueueState;
    use jiff::{SignedDuration, Timestamp};
    use std::sync::atomic::Ordering;
    use tokio_util::sync::CancellationToken;

    const THIRTY_DAYS: Duration = Duration::from_secs(30 * 86_400);

    fn days_ago(days: i64) -> Timestamp {
        Timestamp::now() - SignedDuration::from_hours(24 * days)
    }

    #[tokio::test]
    async fn test_sweep_removes_only_old_complete_entries() {
        let backend = Arc::new(MemoryBackend::new());
        for _ in 0..100 {
            backend.seed("hello", QueueState::Complete, days_ago(60));
        }
        for _ in 0..5 {
            backend.seed("hello", QueueState::Complete, days_ago(1));
        }
        for _ in 0..10 {
            backend.seed("hello", QueueState::Waiting, days_ago(60));
        }
        let run = backend.seed_waiting(LOG_RETENTION);
        let ctx = TaskContext::new(&run, CancellationToken::new(), backend.clone());

        LogRetentionTask::new(backend.clone(), THIRTY_DAYS, 7)
            .run(ctx)
            .await
            .unwrap();

        assert_eq!(backend.count_in(QueueState::Complete), 5);
        assert_eq!(backend.count_in(QueueState::Waiting), 11);
        assert_eq!(backend.logs_for(run.id)[0]["deleted"], 100);
    }

    #[tokio::test]
    async fn test_sweep_halts_on_error_and_reports_progress() {
        let backend = Arc::new(MemoryBackend::new());
        for _ in 0..50 {
            backend.seed("hello", QueueState::Complete, days_ago(60));
        }
        backend.fail_purge_on_call.store(3, Ordering::SeqCst);
        let run = backend.seed_waiting(LOG_RETENTION);
        let ctx = TaskContext::new(&run, CancellationToken::new(), backend.clone());

        let err = LogRetentionTask::new(backend.clone(), THIRTY_DAYS, 10)
            .run(ctx)
            .await
            .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("after 20 deletions"), "{}", message);
        assert!(!message.contains("last processed id none"), "{}", message);
        assert_eq!(backend.count_in(QueueState::Complete), 30);
    }
}
