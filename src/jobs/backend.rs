//! Store capabilities the scheduler components depend on.
//!
//! Components hold these as trait objects so the claim protocol, the lease
//! state machine and the emitter run unchanged against PostgreSQL or an
//! in-memory store.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{NewQueueEntry, QueueEntry, QueueState, TaskDefinition};
use crate::pubsub::QueueNotification;
use crate::repositories::{
    ClaimOutcome, LeaseRepository, PurgedPage, QueueRepository, TaskLogRepository, TaskRepository,
};

#[async_trait]
pub trait QueueBackend: Send + Sync + 'static {
    async fn enqueue(&self, entry: NewQueueEntry) -> AppResult<QueueEntry>;

    /// Best-effort wake-up for workers.
    async fn publish(&self, notification: &QueueNotification) -> AppResult<()>;

    /// Claims a waiting entry and commits it as `running`.
    async fn claim(&self, id: Uuid) -> AppResult<ClaimOutcome>;

    /// Commits a `running` entry as `complete` or `stopped`.
    async fn finish(&self, id: Uuid, state: QueueState) -> AppResult<QueueEntry>;

    async fn list_stale(
        &self,
        cutoff: jiff::Timestamp,
        after: Option<Uuid>,
        limit: i64,
    ) -> AppResult<Vec<QueueEntry>>;

    async fn purge_completed(
        &self,
        cutoff: jiff::Timestamp,
        after: Option<Uuid>,
        limit: i64,
    ) -> AppResult<PurgedPage>;
}

#[async_trait]
pub trait TaskLogSink: Send + Sync + 'static {
    async fn append_log(&self, task_id: Uuid, log: JsonValue) -> AppResult<()>;
}

#[async_trait]
pub trait LeaseBackend: Send + Sync + 'static {
    async fn acquire(&self, instance_id: Uuid) -> AppResult<bool>;
    async fn maintain(&self, instance_id: Uuid) -> AppResult<bool>;
    async fn release(&self, instance_id: Uuid) -> AppResult<bool>;
}

#[async_trait]
pub trait DefinitionSource: Send + Sync + 'static {
    /// Enabled, non-deleted task definitions.
    async fn active_definitions(&self) -> AppResult<Vec<TaskDefinition>>;
}

#[async_trait]
impl QueueBackend for QueueRepository {
    async fn enqueue(&self, entry: NewQueueEntry) -> AppResult<QueueEntry> {
        self.insert(entry).await
    }

    async fn publish(&self, notification: &QueueNotification) -> AppResult<()> {
        QueueRepository::publish(self, notification).await
    }

    async fn claim(&self, id: Uuid) -> AppResult<ClaimOutcome> {
        QueueRepository::claim(self, id).await
    }

    async fn finish(&self, id: Uuid, state: QueueState) -> AppResult<QueueEntry> {
        QueueRepository::finish(self, id, state).await
    }

    async fn list_stale(
        &self,
        cutoff: jiff::Timestamp,
        after: Option<Uuid>,
        limit: i64,
    ) -> AppResult<Vec<QueueEntry>> {
        QueueRepository::list_stale(self, cutoff, after, limit).await
    }

    async fn purge_completed(
        &self,
        cutoff: jiff::Timestamp,
        after: Option<Uuid>,
        limit: i64,
    ) -> AppResult<PurgedPage> {
        self.purge_completed_page(cutoff, after, limit).await
    }
}

#[async_trait]
impl TaskLogSink for TaskLogRepository {
    async fn append_log(&self, task_id: Uuid, log: JsonValue) -> AppResult<()> {
        self.append(task_id, log).await.map(|_| ())
    }
}

#[async_trait]
impl LeaseBackend for LeaseRepository {
    async fn acquire(&self, instance_id: Uuid) -> AppResult<bool> {
        LeaseRepository::acquire(self, instance_id).await
    }

    async fn maintain(&self, instance_id: Uuid) -> AppResult<bool> {
        LeaseRepository::maintain(self, instance_id).await
    }

    async fn release(&self, instance_id: Uuid) -> AppResult<bool> {
        LeaseRepository::release(self, instance_id).await
    }
}

#[async_trait]
impl DefinitionSource for TaskRepository {
    async fn active_definitions(&self) -> AppResult<Vec<TaskDefinition>> {
        self.active().await
    }
}
