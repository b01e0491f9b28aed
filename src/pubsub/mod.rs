//! Queue notifications over PostgreSQL `LISTEN`/`NOTIFY`.
//!
//! Notifications are wake-up hints carrying only an entry id and task name;
//! the `task_queue` table stays the source of truth.

mod backoff;
mod listener;

pub use backoff::Backoff;
pub use listener::{NotificationSource, PgListener};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Channel every instance listens on.
pub const CHANNEL: &str = "task_queue_notification";

/// Payload published when a queue entry becomes claimable.
///
/// Unknown fields are ignored on decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueNotification {
    pub id: Uuid,
    pub queue: String,
}

impl QueueNotification {
    pub fn new(id: Uuid, queue: impl Into<String>) -> Self {
        Self {
            id,
            queue: queue.into(),
        }
    }

    pub fn decode(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }
}
