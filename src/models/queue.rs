//! Queue entry model and its state machine.
//!
//! A queue entry is created `waiting`, moved to `running` by the worker that
//! holds its row lock, and finished as `complete` or `stopped` by that same
//! worker. The two finished states are terminal.

use std::io::Write;

use diesel::deserialize::{self, FromSql};
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel::serialize::{self, Output, ToSql};
use diesel::sql_types::Text;
use diesel::{AsExpression, FromSqlRow};
use jiff_diesel::{Timestamp, ToDiesel};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::task_queue;

// ============================================================================
// QueueState
// ============================================================================

/// Lifecycle state of a queue entry.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsExpression, FromSqlRow,
)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "lowercase")]
pub enum QueueState {
    Waiting,
    Running,
    Complete,
    Stopped,
}

impl QueueState {
    pub const ALL: [QueueState; 4] = [
        QueueState::Waiting,
        QueueState::Running,
        QueueState::Complete,
        QueueState::Stopped,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueState::Waiting => "waiting",
            QueueState::Running => "running",
            QueueState::Complete => "complete",
            QueueState::Stopped => "stopped",
        }
    }

    /// `complete` and `stopped` never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, QueueState::Complete | QueueState::Stopped)
    }

    /// Whether `self -> next` is an edge of `waiting -> running -> {complete, stopped}`.
    pub fn can_transition_to(&self, next: QueueState) -> bool {
        matches!(
            (self, next),
            (QueueState::Waiting, QueueState::Running)
                | (QueueState::Running, QueueState::Complete)
                | (QueueState::Running, QueueState::Stopped)
        )
    }
}

impl std::fmt::Display for QueueState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for QueueState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "waiting" => Ok(QueueState::Waiting),
            "running" => Ok(QueueState::Running),
            "complete" => Ok(QueueState::Complete),
            "stopped" => Ok(QueueState::Stopped),
            _ => Err(format!(
                "Unrecognized queue state '{}'. Valid states are: waiting, running, complete, stopped",
                s
            )),
        }
    }
}

impl diesel::query_builder::QueryId for QueueState {
    type QueryId = QueueState;
    const HAS_STATIC_QUERY_ID: bool = false;
}

impl ToSql<Text, Pg> for QueueState {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        out.write_all(self.as_str().as_bytes())?;
        Ok(serialize::IsNull::No)
    }
}

impl FromSql<Text, Pg> for QueueState {
    fn from_sql(bytes: <Pg as diesel::backend::Backend>::RawValue<'_>) -> deserialize::Result<Self> {
        let s = <String as FromSql<Text, Pg>>::from_sql(bytes)?;
        s.parse::<QueueState>().map_err(Into::into)
    }
}

// ============================================================================
// QueueEntry
// ============================================================================

/// A single scheduled execution of a task.
#[derive(Debug, Clone, Queryable, Selectable, QueryableByName)]
#[diesel(table_name = task_queue)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct QueueEntry {
    pub id: Uuid,
    pub name: String,
    pub state: QueueState,
    pub run_at: Timestamp,
    pub task_data: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl QueueEntry {
    pub fn run_at(&self) -> jiff::Timestamp {
        self.run_at.to_jiff()
    }

    pub fn created_at(&self) -> jiff::Timestamp {
        self.created_at.to_jiff()
    }

    pub fn updated_at(&self) -> jiff::Timestamp {
        self.updated_at.to_jiff()
    }

    /// Changeset moving this entry to `state`, stamped with `now`.
    pub fn transition(&self, state: QueueState, now: jiff::Timestamp) -> QueueEntryChanges {
        QueueEntryChanges {
            state,
            updated_at: now.to_diesel(),
        }
    }
}

/// Insert payload for a queue entry; `id` is server-assigned when `None`.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = task_queue)]
pub struct NewQueueEntry {
    pub id: Option<Uuid>,
    pub name: String,
    pub state: QueueState,
    pub run_at: Timestamp,
    pub task_data: Option<String>,
}

impl NewQueueEntry {
    /// A `waiting` entry for `name` eligible at `run_at`.
    pub fn new(name: impl Into<String>, run_at: jiff::Timestamp) -> Self {
        Self {
            id: None,
            name: name.into(),
            state: QueueState::Waiting,
            run_at: run_at.to_diesel(),
            task_data: None,
        }
    }

    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.task_data = Some(data.into());
        self
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }
}

/// State and timestamp written by `update_tx`.
#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = task_queue)]
pub struct QueueEntryChanges {
    pub state: QueueState,
    pub updated_at: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_round_trip_str() {
        for state in QueueState::ALL {
            assert_eq!(state.as_str().parse::<QueueState>().unwrap(), state);
        }
        assert!("failed".parse::<QueueState>().is_err());
    }

    #[test]
    fn test_state_transitions_follow_lifecycle() {
        use QueueState::*;

        assert!(Waiting.can_transition_to(Running));
        assert!(Running.can_transition_to(Complete));
        assert!(Running.can_transition_to(Stopped));

        assert!(!Waiting.can_transition_to(Complete));
        assert!(!Waiting.can_transition_to(Stopped));
        assert!(!Running.can_transition_to(Waiting));
        for terminal in [Complete, Stopped] {
            assert!(terminal.is_terminal());
            for next in QueueState::ALL {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_new_entry_starts_waiting() {
        let at = jiff::Timestamp::from_second(1_700_000_000).unwrap();
        let entry = NewQueueEntry::new("hello", at).with_data("payload");
        assert_eq!(entry.state, QueueState::Waiting);
        assert_eq!(entry.run_at.to_jiff(), at);
        assert_eq!(entry.task_data.as_deref(), Some("payload"));
        assert!(entry.id.is_none());
    }

    #[test]
    fn test_state_serde_lowercase() {
        let json = serde_json::to_string(&QueueState::Complete).unwrap();
        assert_eq!(json, "\"complete\"");
    }
}
