//! Command handlers for CLI operations
//!
//! Each handler owns the merged settings and opens its own connection pool.

pub mod migrate;
pub mod queue;
pub mod serve;
pub mod status;
pub mod task;

pub use migrate::MigrateCommandHandler;
pub use queue::QueueCommandHandler;
pub use serve::ServeCommandHandler;
pub use status::StatusCommandHandler;
pub use task::TaskCommandHandler;

use crate::config::settings::Settings;
use crate::db::establish_async_connection_pool;
use crate::error::AppResult;
use crate::repositories::Repositories;

/// Store access for one-shot administrative commands.
async fn connect(config: &Settings) -> AppResult<Repositories> {
    config.db.validate()?;
    let pool = establish_async_connection_pool(&config.db).await?;
    Ok(Repositories::new(
        pool,
        config.db.timeout()?,
        config.scheduler.lease_ttl()?,
    ))
}

fn format_timestamp(ts: jiff::Timestamp) -> String {
    ts.strftime("%Y-%m-%d %H:%M:%S UTC").to_string()
}
