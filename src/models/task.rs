use diesel::prelude::*;
use jiff_diesel::Timestamp;

use crate::schema::task;

/// Administrator-facing definition of a named task and its cron schedule.
///
/// Definitions are tombstoned (`deleted = true`) rather than removed so that
/// queue entries keep a valid foreign reference.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = task)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct TaskDefinition {
    pub name: String,
    pub cron_expr: String,
    pub enabled: bool,
    pub deleted: bool,
    pub updated_at: Timestamp,
}

impl TaskDefinition {
    /// Whether the cron emitter should schedule this definition.
    pub fn is_active(&self) -> bool {
        self.enabled && !self.deleted
    }

    pub fn updated_at(&self) -> jiff::Timestamp {
        self.updated_at.to_jiff()
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = task)]
pub struct NewTaskDefinition {
    pub name: String,
    pub cron_expr: String,
    pub enabled: bool,
}
