//! Row types for the scheduler tables.

mod lease;
mod queue;
mod task;
mod task_log;

pub use lease::{LEASE_KEY, SchedulerLease};
pub use queue::{NewQueueEntry, QueueEntry, QueueEntryChanges, QueueState};
pub use task::{NewTaskDefinition, TaskDefinition};
pub use task_log::{NewTaskLog, TaskLog};
