//! Queue entry persistence: inserts, lookups, filtered listing, the
//! transactional claim protocol and retention deletes.

use diesel::prelude::*;
use diesel::sql_types::{BigInt, Nullable, Text, Timestamptz, Uuid as SqlUuid};
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use jiff_diesel::ToDiesel;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{NewQueueEntry, QueueEntry, QueueState};
use crate::pubsub::QueueNotification;
use crate::repositories::db_handle::DbHandle;
use crate::repositories::ordering::{QUEUE_ORDER_COLUMNS, order_by_clause};
use crate::repositories::pagination::{Page, PageMetadata, PageRequest};
use crate::schema::task_queue;

/// Result of trying to take the row lock on a waiting entry.
#[derive(Debug)]
pub enum ClaimOutcome {
    /// The caller holds the row lock; the entry was `waiting`.
    Claimed(QueueEntry),
    /// No entry with that id exists.
    NotFound,
    /// The entry exists but another transaction holds it or it is no longer
    /// `waiting`.
    AlreadyClaimed,
}

/// Filters for [`QueueRepository::list`]. Absent fields do not constrain.
#[derive(Debug, Clone, Default)]
pub struct QueueFilter {
    pub state: Option<QueueState>,
    pub run_at_from: Option<jiff::Timestamp>,
    pub run_at_to: Option<jiff::Timestamp>,
    pub created_from: Option<jiff::Timestamp>,
    pub created_to: Option<jiff::Timestamp>,
    /// Column tokens, `-` prefix for descending
    pub order_by: Vec<String>,
    pub page: PageRequest,
}

// Each optional predicate keeps the `($n IS NULL OR ...)` shape so the plan
// does not depend on which filters are present.
const FILTER_PREDICATES: &str = "($1::text IS NULL OR state = $1) \
     AND ($2::timestamptz IS NULL OR run_at >= $2) \
     AND ($3::timestamptz IS NULL OR run_at < $3) \
     AND ($4::timestamptz IS NULL OR created_at >= $4) \
     AND ($5::timestamptz IS NULL OR created_at < $5)";

#[derive(QueryableByName)]
struct ListedEntry {
    #[diesel(embed)]
    entry: QueueEntry,
    #[diesel(sql_type = BigInt)]
    total_count: i64,
}

#[derive(QueryableByName)]
struct CountRow {
    #[diesel(sql_type = BigInt)]
    total: i64,
}

#[derive(QueryableByName)]
struct DeletedId {
    #[diesel(sql_type = SqlUuid)]
    id: Uuid,
}

/// Outcome of one retention page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PurgedPage {
    pub deleted: usize,
    /// Highest id deleted in this page; the keyset cursor for the next one.
    pub last_id: Option<Uuid>,
}

#[derive(Clone)]
pub struct QueueRepository {
    db: DbHandle,
}

impl QueueRepository {
    pub fn new(db: DbHandle) -> Self {
        Self { db }
    }

    /// Inserts a `waiting` entry. The id is server-assigned unless the caller
    /// supplies one, in which case a conflict fails with `Duplicate`.
    pub async fn insert(&self, entry: NewQueueEntry) -> AppResult<QueueEntry> {
        self.db
            .deadline("insert queue entry", async {
                let mut conn = self.db.conn().await?;
                diesel::insert_into(task_queue::table)
                    .values(&entry)
                    .returning(QueueEntry::as_returning())
                    .get_result(&mut conn)
                    .await
                    .map_err(AppError::from)
            })
            .await
    }

    pub async fn get(&self, id: Uuid) -> AppResult<Option<QueueEntry>> {
        self.db
            .deadline("get queue entry", async {
                let mut conn = self.db.conn().await?;
                task_queue::table
                    .find(id)
                    .select(QueueEntry::as_select())
                    .first(&mut conn)
                    .await
                    .optional()
                    .map_err(AppError::from)
            })
            .await
    }

    /// Filtered, ordered, paginated listing with the total match count.
    pub async fn list(&self, filter: &QueueFilter) -> AppResult<Page<QueueEntry>> {
        let order_by = order_by_clause(&filter.order_by, QUEUE_ORDER_COLUMNS)?;
        let sql = format!(
            "SELECT id, name, state, run_at, task_data, created_at, updated_at, \
             count(*) OVER () AS total_count \
             FROM task_queue WHERE {} {} LIMIT $6 OFFSET $7",
            FILTER_PREDICATES, order_by
        );

        let state = filter.state.map(|s| s.as_str().to_string());
        let run_at_from = filter.run_at_from.map(|t| t.to_diesel());
        let run_at_to = filter.run_at_to.map(|t| t.to_diesel());
        let created_from = filter.created_from.map(|t| t.to_diesel());
        let created_to = filter.created_to.map(|t| t.to_diesel());

        self.db
            .deadline("list queue entries", async {
                let mut conn = self.db.conn().await?;
                let rows: Vec<ListedEntry> = diesel::sql_query(sql)
                    .bind::<Nullable<Text>, _>(state.clone())
                    .bind::<Nullable<Timestamptz>, _>(run_at_from)
                    .bind::<Nullable<Timestamptz>, _>(run_at_to)
                    .bind::<Nullable<Timestamptz>, _>(created_from)
                    .bind::<Nullable<Timestamptz>, _>(created_to)
                    .bind::<BigInt, _>(filter.page.limit())
                    .bind::<BigInt, _>(filter.page.offset())
                    .load(&mut conn)
                    .await?;

                // Past the last page the window count is unavailable.
                let total = match rows.as_slice().first() {
                    Some(row) => row.total_count,
                    None if filter.page.offset() > 0 => {
                        let count: CountRow = diesel::sql_query(format!(
                            "SELECT count(*) AS total FROM task_queue WHERE {}",
                            FILTER_PREDICATES
                        ))
                        .bind::<Nullable<Text>, _>(state)
                        .bind::<Nullable<Timestamptz>, _>(run_at_from)
                        .bind::<Nullable<Timestamptz>, _>(run_at_to)
                        .bind::<Nullable<Timestamptz>, _>(created_from)
                        .bind::<Nullable<Timestamptz>, _>(created_to)
                        .get_result(&mut conn)
                        .await?;
                        count.total
                    }
                    None => 0,
                };

                Ok(Page {
                    items: rows.into_iter().map(|row| row.entry).collect(),
                    meta: PageMetadata::new(&filter.page, total),
                })
            })
            .await
    }

    /// `SELECT ... FOR UPDATE SKIP LOCKED` on a waiting entry.
    ///
    /// On success the row lock is held until `conn`'s transaction ends. When
    /// no row comes back a plain existence check tells `NotFound` apart from
    /// `AlreadyClaimed`; neither blocks on another worker's lock.
    pub async fn claim_tx(conn: &mut AsyncPgConnection, id: Uuid) -> AppResult<ClaimOutcome> {
        let locked = task_queue::table
            .filter(task_queue::id.eq(id))
            .filter(task_queue::state.eq(QueueState::Waiting))
            .select(QueueEntry::as_select())
            .for_update()
            .skip_locked()
            .first(conn)
            .await
            .optional()?;

        if let Some(entry) = locked {
            return Ok(ClaimOutcome::Claimed(entry));
        }

        let exists: bool = diesel::select(diesel::dsl::exists(task_queue::table.find(id)))
            .get_result(conn)
            .await?;

        Ok(if exists {
            ClaimOutcome::AlreadyClaimed
        } else {
            ClaimOutcome::NotFound
        })
    }

    /// Blocking `SELECT ... FOR UPDATE` used when finalizing an entry this
    /// worker already moved to `running`.
    pub async fn lock_tx(conn: &mut AsyncPgConnection, id: Uuid) -> AppResult<Option<QueueEntry>> {
        task_queue::table
            .find(id)
            .select(QueueEntry::as_select())
            .for_update()
            .first(conn)
            .await
            .optional()
            .map_err(AppError::from)
    }

    /// Moves a locked entry to `next`, stamping `updated_at`.
    ///
    /// The caller must hold the row lock in `conn`'s transaction. Edges outside
    /// `waiting -> running -> {complete, stopped}` are rejected.
    pub async fn update_tx(
        conn: &mut AsyncPgConnection,
        entry: &QueueEntry,
        next: QueueState,
    ) -> AppResult<QueueEntry> {
        if !entry.state.can_transition_to(next) {
            return Err(AppError::BadRequest {
                message: format!(
                    "queue entry {} cannot move from {} to {}",
                    entry.id, entry.state, next
                ),
            });
        }

        diesel::update(task_queue::table.find(entry.id))
            .set(&entry.transition(next, jiff::Timestamp::now()))
            .returning(QueueEntry::as_returning())
            .get_result(conn)
            .await
            .map_err(AppError::from)
    }

    /// Removes a locked entry; its logs go with it.
    pub async fn delete_tx(conn: &mut AsyncPgConnection, id: Uuid) -> AppResult<QueueEntry> {
        diesel::delete(task_queue::table.find(id))
            .returning(QueueEntry::as_returning())
            .get_result(conn)
            .await
            .optional()?
            .ok_or_else(|| AppError::not_found("QueueEntry", "id", id))
    }

    /// Claims `id` and commits it as `running` in one transaction.
    pub async fn claim(&self, id: Uuid) -> AppResult<ClaimOutcome> {
        self.db
            .deadline("claim queue entry", async {
                let mut pooled = self.db.conn().await?;
                let conn: &mut AsyncPgConnection = &mut pooled;
                conn.transaction::<_, AppError, _>(|conn| {
                    async move {
                        match Self::claim_tx(conn, id).await? {
                            ClaimOutcome::Claimed(entry) => {
                                let running =
                                    Self::update_tx(conn, &entry, QueueState::Running).await?;
                                Ok(ClaimOutcome::Claimed(running))
                            }
                            other => Ok(other),
                        }
                    }
                    .scope_boxed()
                })
                .await
            })
            .await
    }

    /// Commits a `running` entry as `complete` or `stopped`.
    pub async fn finish(&self, id: Uuid, state: QueueState) -> AppResult<QueueEntry> {
        self.db
            .deadline("finish queue entry", async {
                let mut pooled = self.db.conn().await?;
                let conn: &mut AsyncPgConnection = &mut pooled;
                conn.transaction::<_, AppError, _>(|conn| {
                    async move {
                        let entry = Self::lock_tx(conn, id)
                            .await?
                            .ok_or_else(|| AppError::not_found("QueueEntry", "id", id))?;
                        Self::update_tx(conn, &entry, state).await
                    }
                    .scope_boxed()
                })
                .await
            })
            .await
    }

    /// Deletes an entry that no worker currently holds.
    pub async fn delete(&self, id: Uuid) -> AppResult<QueueEntry> {
        self.db
            .deadline("delete queue entry", async {
                let mut pooled = self.db.conn().await?;
                let conn: &mut AsyncPgConnection = &mut pooled;
                conn.transaction::<_, AppError, _>(|conn| {
                    async move {
                        match Self::claim_tx(conn, id).await? {
                            ClaimOutcome::Claimed(_) => Self::delete_tx(conn, id).await,
                            ClaimOutcome::NotFound => {
                                Err(AppError::not_found("QueueEntry", "id", id))
                            }
                            ClaimOutcome::AlreadyClaimed => {
                                // Terminal entries are not waiting but are safe to drop.
                                match Self::lock_tx(conn, id).await? {
                                    Some(entry) if entry.state.is_terminal() => {
                                        Self::delete_tx(conn, id).await
                                    }
                                    _ => Err(AppError::BadRequest {
                                        message: format!(
                                            "queue entry {} is running and cannot be deleted",
                                            id
                                        ),
                                    }),
                                }
                            }
                        }
                    }
                    .scope_boxed()
                })
                .await
            })
            .await
    }

    /// One keyset page of `waiting` entries with `run_at <= cutoff`, ordered by id.
    pub async fn list_stale(
        &self,
        cutoff: jiff::Timestamp,
        after: Option<Uuid>,
        limit: i64,
    ) -> AppResult<Vec<QueueEntry>> {
        self.db
            .deadline("list stale queue entries", async {
                let mut conn = self.db.conn().await?;
                let mut query = task_queue::table
                    .filter(task_queue::state.eq(QueueState::Waiting))
                    .filter(task_queue::run_at.le(cutoff.to_diesel()))
                    .order(task_queue::id.asc())
                    .limit(limit)
                    .select(QueueEntry::as_select())
                    .into_boxed();
                if let Some(after) = after {
                    query = query.filter(task_queue::id.gt(after));
                }
                query.load(&mut conn).await.map_err(AppError::from)
            })
            .await
    }

    /// Deletes up to `limit` `complete` entries with `run_at < cutoff` and
    /// `id > after`, lowest ids first.
    pub async fn purge_completed_page(
        &self,
        cutoff: jiff::Timestamp,
        after: Option<Uuid>,
        limit: i64,
    ) -> AppResult<PurgedPage> {
        self.db
            .deadline("purge completed queue entries", async {
                let mut conn = self.db.conn().await?;
                let rows: Vec<DeletedId> = diesel::sql_query(
                    "WITH batch AS ( \
                        SELECT id FROM task_queue \
                        WHERE state = 'complete' AND run_at < $1 \
                          AND ($2::uuid IS NULL OR id > $2) \
                        ORDER BY id LIMIT $3 \
                     ) \
                     DELETE FROM task_queue q USING batch \
                     WHERE q.id = batch.id \
                     RETURNING q.id",
                )
                .bind::<Timestamptz, _>(cutoff.to_diesel())
                .bind::<Nullable<SqlUuid>, _>(after)
                .bind::<BigInt, _>(limit)
                .load(&mut conn)
                .await?;

                Ok(PurgedPage {
                    deleted: rows.len(),
                    last_id: rows.iter().map(|row| row.id).max(),
                })
            })
            .await
    }

    /// Publishes `notification` on its pub/sub channel.
    pub async fn publish(&self, notification: &QueueNotification) -> AppResult<()> {
        let payload = serde_json::to_string(notification).map_err(|e| AppError::Internal {
            source: anyhow::Error::from(e),
        })?;
        self.notify(crate::pubsub::CHANNEL, &payload).await
    }

    /// `pg_notify(channel, payload)`; delivery is best-effort.
    pub async fn notify(&self, channel: &str, payload: &str) -> AppResult<()> {
        self.db
            .deadline("notify", async {
                let mut conn = self.db.conn().await?;
                diesel::sql_query("SELECT pg_notify($1, $2)")
                    .bind::<Text, _>(channel)
                    .bind::<Text, _>(payload)
                    .execute(&mut conn)
                    .await?;
                Ok(())
            })
            .await
    }
}
