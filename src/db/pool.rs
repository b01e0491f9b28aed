//! Async database connection pool implementation.

use diesel_async::AsyncPgConnection;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::pooled_connection::bb8::Pool;

use crate::config::DbConfig;
use crate::error::AppError;

/// Async connection pool type alias.
///
/// bb8::Pool internally uses Arc, so Clone is cheap. Structures holding
/// AsyncDbPool can derive Clone without additional Arc wrapping.
pub type AsyncDbPool = Pool<AsyncPgConnection>;

/// Creates the pool described by `config`.
///
/// `max_open_conns` bounds the pool, `max_idle_conns` is kept warm,
/// idle connections are closed after `max_idle_time`, and checkouts wait
/// at most `connect_timeout`.
///
/// # Example
///
/// ```ignore
/// let pool = establish_async_connection_pool(&settings.db).await?;
/// let mut conn = pool.get().await?;
/// ```
pub async fn establish_async_connection_pool(config: &DbConfig) -> Result<AsyncDbPool, AppError> {
    let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(config.dsn.clone());
    let min_idle = (config.max_idle_conns > 0).then_some(config.max_idle_conns);

    let pool = Pool::builder()
        .max_size(config.max_open_conns)
        .min_idle(min_idle)
        .idle_timeout(Some(config.max_idle_time()?))
        .connection_timeout(config.connect_timeout()?)
        .build(manager)
        .await?;

    Ok(pool)
}
