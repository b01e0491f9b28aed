//! Task definition persistence.
//!
//! Definitions are never hard-deleted: queue entries reference them by
//! name, so removal is a tombstone that also disables the definition.

use diesel::prelude::*;
use diesel::upsert::excluded;
use diesel_async::RunQueryDsl;

use crate::error::{AppError, AppResult};
use crate::jobs::cron::CronSchedule;
use crate::models::{NewTaskDefinition, TaskDefinition};
use crate::repositories::db_handle::DbHandle;
use crate::schema::task;

#[derive(Clone)]
pub struct TaskRepository {
    db: DbHandle,
}

impl TaskRepository {
    pub fn new(db: DbHandle) -> Self {
        Self { db }
    }

    /// Creates the definition or replaces its schedule, reviving a tombstone.
    ///
    /// The cron expression is validated before anything is written.
    pub async fn upsert(&self, name: &str, cron_expr: &str, enabled: bool) -> AppResult<TaskDefinition> {
        if name.trim().is_empty() {
            return Err(AppError::Validation {
                field: "name".to_string(),
                reason: "Task name cannot be empty".to_string(),
            });
        }
        cron_expr
            .parse::<CronSchedule>()
            .map_err(|e| AppError::Validation {
                field: "cron_expr".to_string(),
                reason: e.to_string(),
            })?;

        let definition = NewTaskDefinition {
            name: name.to_string(),
            cron_expr: cron_expr.trim().to_string(),
            enabled,
        };

        self.db
            .deadline("upsert task", async {
                let mut conn = self.db.conn().await?;
                diesel::insert_into(task::table)
                    .values(&definition)
                    .on_conflict(task::name)
                    .do_update()
                    .set((
                        task::cron_expr.eq(excluded(task::cron_expr)),
                        task::enabled.eq(excluded(task::enabled)),
                        task::deleted.eq(false),
                        task::updated_at.eq(diesel::dsl::now),
                    ))
                    .returning(TaskDefinition::as_returning())
                    .get_result(&mut conn)
                    .await
                    .map_err(AppError::from)
            })
            .await
    }

    pub async fn set_enabled(&self, name: &str, enabled: bool) -> AppResult<TaskDefinition> {
        self.db
            .deadline("set task enabled", async {
                let mut conn = self.db.conn().await?;
                diesel::update(task::table.find(name).filter(task::deleted.eq(false)))
                    .set((task::enabled.eq(enabled), task::updated_at.eq(diesel::dsl::now)))
                    .returning(TaskDefinition::as_returning())
                    .get_result(&mut conn)
                    .await
                    .optional()?
                    .ok_or_else(|| AppError::not_found("TaskDefinition", "name", name))
            })
            .await
    }

    /// Marks the definition deleted and disabled.
    pub async fn tombstone(&self, name: &str) -> AppResult<TaskDefinition> {
        self.db
            .deadline("tombstone task", async {
                let mut conn = self.db.conn().await?;
                diesel::update(task::table.find(name))
                    .set((
                        task::deleted.eq(true),
                        task::enabled.eq(false),
                        task::updated_at.eq(diesel::dsl::now),
                    ))
                    .returning(TaskDefinition::as_returning())
                    .get_result(&mut conn)
                    .await
                    .optional()?
                    .ok_or_else(|| AppError::not_found("TaskDefinition", "name", name))
            })
            .await
    }

    pub async fn get(&self, name: &str) -> AppResult<TaskDefinition> {
        self.db
            .deadline("get task", async {
                let mut conn = self.db.conn().await?;
                task::table
                    .find(name)
                    .select(TaskDefinition::as_select())
                    .first(&mut conn)
                    .await
                    .optional()?
                    .ok_or_else(|| AppError::not_found("TaskDefinition", "name", name))
            })
            .await
    }

    pub async fn list(&self, include_deleted: bool) -> AppResult<Vec<TaskDefinition>> {
        self.db
            .deadline("list tasks", async {
                let mut conn = self.db.conn().await?;
                let mut query = task::table
                    .order(task::name.asc())
                    .select(TaskDefinition::as_select())
                    .into_boxed();
                if !include_deleted {
                    query = query.filter(task::deleted.eq(false));
                }
                query.load(&mut conn).await.map_err(AppError::from)
            })
            .await
    }

    /// Enabled, non-deleted definitions: what the cron emitter schedules.
    pub async fn active(&self) -> AppResult<Vec<TaskDefinition>> {
        self.db
            .deadline("list active tasks", async {
                let mut conn = self.db.conn().await?;
                task::table
                    .filter(task::enabled.eq(true))
                    .filter(task::deleted.eq(false))
                    .order(task::name.asc())
                    .select(TaskDefinition::as_select())
                    .load(&mut conn)
                    .await
                    .map_err(AppError::from)
            })
            .await
    }
}
