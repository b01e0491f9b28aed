//! Tasks shipped with cronwell.

mod hello;
mod log_retention;

pub use hello::{HELLO, hello};
pub use log_retention::{LOG_RETENTION, LogRetentionTask};

use std::sync::Arc;

use crate::config::MaintenanceConfig;
use crate::error::{AppError, AppResult};
use crate::jobs::backend::QueueBackend;
use crate::jobs::registry::TaskRegistry;
use crate::repositories::TaskRepository;

/// Registers the built-in handlers.
pub fn register_builtin(
    registry: &TaskRegistry,
    queue: Arc<dyn QueueBackend>,
    maintenance: &MaintenanceConfig,
) -> AppResult<()> {
    let retention = maintenance.log_retention()?;
    registry
        .add(HELLO, hello)
        .add(LOG_RETENTION, LogRetentionTask::new(queue, retention, maintenance.page_size));
    Ok(())
}

/// Keeps the `log_retention` definition on `maintenance.schedule`.
///
/// A definition an operator disabled stays disabled and one they removed
/// stays removed.
pub async fn ensure_builtin_definitions(
    tasks: &TaskRepository,
    maintenance: &MaintenanceConfig,
) -> AppResult<()> {
    match tasks.get(LOG_RETENTION).await {
        Ok(existing) if existing.deleted => Ok(()),
        Ok(existing) if existing.cron_expr == maintenance.schedule => Ok(()),
        Ok(existing) => {
            tasks
                .upsert(LOG_RETENTION, &maintenance.schedule, existing.enabled)
                .await?;
            tracing::info!(schedule = %maintenance.schedule, "Updated log_retention schedule");
            Ok(())
        }
        Err(AppError::NotFound { .. }) => {
            tasks.upsert(LOG_RETENTION, &maintenance.schedule, true).await?;
            tracing::info!(schedule = %maintenance.schedule, "Registered log_retention definition");
            Ok(())
        }
        Err(e) => Err(e),
    }
}
