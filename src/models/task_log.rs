use diesel::prelude::*;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::schema::task_log;

/// Append-only log record attached to a queue entry.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = task_log)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct TaskLog {
    pub id: i64,
    pub task_id: Uuid,
    pub log: JsonValue,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = task_log)]
pub struct NewTaskLog {
    pub task_id: Uuid,
    pub log: JsonValue,
}

impl NewTaskLog {
    /// Builds a log record, wrapping bare strings as `{"message": ...}`.
    pub fn new(task_id: Uuid, log: JsonValue) -> Self {
        let log = match log {
            JsonValue::String(message) => serde_json::json!({ "message": message }),
            other => other,
        };
        Self { task_id, log }
    }
}
