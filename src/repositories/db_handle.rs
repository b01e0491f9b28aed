//! Pool access with a per-call deadline.

use std::future::Future;
use std::time::Duration;

use diesel_async::AsyncPgConnection;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;

use crate::db::AsyncDbPool;
use crate::error::{AppError, AppResult};

pub type PooledConn<'a> = bb8::PooledConnection<'a, AsyncDieselConnectionManager<AsyncPgConnection>>;

/// The pool plus the configured query timeout (`db.timeout`).
///
/// Every repository call runs inside [`DbHandle::deadline`], so pool
/// checkout and the query itself share one budget. Expiry surfaces as the
/// transient [`AppError::Timeout`].
#[derive(Clone)]
pub struct DbHandle {
    pool: AsyncDbPool,
    timeout: Duration,
}

impl DbHandle {
    pub fn new(pool: AsyncDbPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    pub fn pool(&self) -> &AsyncDbPool {
        &self.pool
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn conn(&self) -> AppResult<PooledConn<'_>> {
        self.pool.get().await.map_err(AppError::from)
    }

    pub async fn deadline<T, F>(&self, operation: &str, fut: F) -> AppResult<T>
    where
        F: Future<Output = AppResult<T>>,
    {
        with_deadline(self.timeout, operation, fut).await
    }
}

/// Runs `fut`, failing with [`AppError::Timeout`] once `timeout` elapses.
pub async fn with_deadline<T, F>(timeout: Duration, operation: &str, fut: F) -> AppResult<T>
where
    F: Future<Output = AppResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(AppError::Timeout {
            operation: operation.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}
