//! Scheduling core: task registry, leader election, cron emitter and the
//! worker loop, plus the built-in tasks.

pub mod backend;
pub mod context;
pub mod cron;
pub mod emitter;
pub mod error;
pub mod lease;
pub mod registry;
pub mod tasks;
pub mod worker;

#[cfg(test)]
pub(crate) mod memory;

pub use backend::{DefinitionSource, LeaseBackend, QueueBackend, TaskLogSink};
pub use context::TaskContext;
pub use cron::{CronError, CronSchedule};
pub use emitter::CronEmitter;
pub use error::{JobError, JobResult};
pub use lease::{LeaderElection, LeadershipHook, LeaseState};
pub use registry::{RegistryError, TaskHandler, TaskRegistry};
pub use worker::{Dispatch, Shutdown, Worker, WorkerOptions};

use std::time::Duration;

/// `now - duration`, clamped to the earliest representable instant.
pub(crate) fn time_before(now: jiff::Timestamp, duration: Duration) -> jiff::Timestamp {
    jiff::SignedDuration::try_from(duration)
        .ok()
        .and_then(|span| now.checked_sub(span).ok())
        .unwrap_or(jiff::Timestamp::MIN)
}
