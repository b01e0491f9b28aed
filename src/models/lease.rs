use diesel::prelude::*;
use jiff_diesel::Timestamp;
use uuid::Uuid;

use crate::schema::scheduler_lock;

/// Sentinel primary key of the single scheduler lease row.
pub const LEASE_KEY: &str = "scheduler";

/// The scheduler leadership lease.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = scheduler_lock)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct SchedulerLease {
    pub id: String,
    pub holder_id: Uuid,
    pub last_heartbeat: Timestamp,
}

impl SchedulerLease {
    /// A lease is valid while `now - last_heartbeat < ttl`.
    pub fn is_valid_at(&self, now: jiff::Timestamp, ttl: std::time::Duration) -> bool {
        let age = now.duration_since(self.last_heartbeat.to_jiff());
        match jiff::SignedDuration::try_from(ttl) {
            Ok(ttl) => age < ttl,
            Err(_) => true,
        }
    }
}
