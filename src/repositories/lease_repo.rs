//! The scheduler leadership lease row.

use std::time::Duration;

use diesel::prelude::*;
use diesel::sql_types::{Double, Text, Uuid as SqlUuid};
use diesel_async::RunQueryDsl;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{LEASE_KEY, SchedulerLease};
use crate::repositories::db_handle::DbHandle;
use crate::schema::scheduler_lock;

#[derive(Clone)]
pub struct LeaseRepository {
    db: DbHandle,
    ttl: Duration,
}

impl LeaseRepository {
    pub fn new(db: DbHandle, ttl: Duration) -> Self {
        Self { db, ttl }
    }

    /// Takes or renews the lease.
    ///
    /// The upsert writes iff the row is absent, already held by
    /// `instance_id`, or its heartbeat is older than the TTL. Concurrent
    /// callers serialize on the row lock, so one writer wins per round.
    pub async fn acquire(&self, instance_id: Uuid) -> AppResult<bool> {
        let ttl_secs = self.ttl.as_secs_f64();
        self.db
            .deadline("acquire lease", async {
                let mut conn = self.db.conn().await?;
                let written = diesel::sql_query(
                    "INSERT INTO scheduler_lock (id, holder_id, last_heartbeat) \
                     VALUES ($1, $2, now()) \
                     ON CONFLICT (id) DO UPDATE \
                     SET holder_id = EXCLUDED.holder_id, last_heartbeat = now() \
                     WHERE scheduler_lock.holder_id = EXCLUDED.holder_id \
                        OR scheduler_lock.last_heartbeat < now() - $3 * interval '1 second'",
                )
                .bind::<Text, _>(LEASE_KEY)
                .bind::<SqlUuid, _>(instance_id)
                .bind::<Double, _>(ttl_secs)
                .execute(&mut conn)
                .await?;
                Ok(written == 1)
            })
            .await
    }

    /// Heartbeat-only renewal; false when `instance_id` no longer holds the lease.
    pub async fn maintain(&self, instance_id: Uuid) -> AppResult<bool> {
        self.db
            .deadline("maintain lease", async {
                let mut conn = self.db.conn().await?;
                let updated = diesel::update(
                    scheduler_lock::table
                        .find(LEASE_KEY)
                        .filter(scheduler_lock::holder_id.eq(instance_id)),
                )
                .set(scheduler_lock::last_heartbeat.eq(diesel::dsl::now))
                .execute(&mut conn)
                .await?;
                Ok(updated == 1)
            })
            .await
    }

    /// Drops the lease if `instance_id` holds it.
    pub async fn release(&self, instance_id: Uuid) -> AppResult<bool> {
        self.db
            .deadline("release lease", async {
                let mut conn = self.db.conn().await?;
                let deleted = diesel::delete(
                    scheduler_lock::table
                        .find(LEASE_KEY)
                        .filter(scheduler_lock::holder_id.eq(instance_id)),
                )
                .execute(&mut conn)
                .await?;
                Ok(deleted == 1)
            })
            .await
    }

    /// Current lease row, if any.
    pub async fn current(&self) -> AppResult<Option<SchedulerLease>> {
        self.db
            .deadline("read lease", async {
                let mut conn = self.db.conn().await?;
                scheduler_lock::table
                    .find(LEASE_KEY)
                    .select(SchedulerLease::as_select())
                    .first(&mut conn)
                    .await
                    .optional()
                    .map_err(AppError::from)
            })
            .await
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}
