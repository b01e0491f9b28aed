//! Store: async data access for the scheduler tables.
//!
//! Every call carries the `db.timeout` deadline. Logical outcomes (absent
//! rows, lost claim races) are returned as values; only I/O and constraint
//! failures are errors.

mod db_handle;
mod lease_repo;
pub mod ordering;
pub mod pagination;
mod queue_repo;
mod task_log_repo;
mod task_repo;

pub use db_handle::{DbHandle, PooledConn, with_deadline};
pub use lease_repo::LeaseRepository;
pub use pagination::{Page, PageMetadata, PageRequest};
pub use queue_repo::{ClaimOutcome, PurgedPage, QueueFilter, QueueRepository};
pub use task_log_repo::TaskLogRepository;
pub use task_repo::TaskRepository;

use std::time::Duration;

use crate::db::AsyncDbPool;

/// Aggregates all repositories.
///
/// Since `AsyncDbPool` uses `Arc` internally, cloning is cheap.
#[derive(Clone)]
pub struct Repositories {
    pub tasks: TaskRepository,
    pub queue: QueueRepository,
    pub logs: TaskLogRepository,
    pub lease: LeaseRepository,
}

impl Repositories {
    /// # Arguments
    /// * `pool` - The async database connection pool
    /// * `query_timeout` - Deadline applied to every store call
    /// * `lease_ttl` - Age after which another instance may take the lease
    pub fn new(pool: AsyncDbPool, query_timeout: Duration, lease_ttl: Duration) -> Self {
        let db = DbHandle::new(pool, query_timeout);
        Self {
            tasks: TaskRepository::new(db.clone()),
            queue: QueueRepository::new(db.clone()),
            logs: TaskLogRepository::new(db.clone()),
            lease: LeaseRepository::new(db, lease_ttl),
        }
    }
}
