use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{NewTaskLog, TaskLog};
use crate::repositories::db_handle::DbHandle;
use crate::schema::task_log;

/// Append-only log records attached to queue entries.
#[derive(Clone)]
pub struct TaskLogRepository {
    db: DbHandle,
}

impl TaskLogRepository {
    pub fn new(db: DbHandle) -> Self {
        Self { db }
    }

    /// Appends `log` to entry `task_id`. Bare strings are stored as `{"message": ...}`.
    pub async fn append(&self, task_id: Uuid, log: JsonValue) -> AppResult<TaskLog> {
        let record = NewTaskLog::new(task_id, log);
        self.db
            .deadline("append task log", async {
                let mut conn = self.db.conn().await?;
                diesel::insert_into(task_log::table)
                    .values(&record)
                    .returning(TaskLog::as_returning())
                    .get_result(&mut conn)
                    .await
                    .map_err(AppError::from)
            })
            .await
    }

    /// Logs for one entry in insertion order.
    pub async fn list(&self, task_id: Uuid) -> AppResult<Vec<TaskLog>> {
        self.db
            .deadline("list task logs", async {
                let mut conn = self.db.conn().await?;
                task_log::table
                    .filter(task_log::task_id.eq(task_id))
                    .order(task_log::id.asc())
                    .select(TaskLog::as_select())
                    .load(&mut conn)
                    .await
                    .map_err(AppError::from)
            })
            .await
    }
}
