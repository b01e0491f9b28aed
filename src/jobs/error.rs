use thiserror::Error;

use crate::error::AppError;
use crate::jobs::cron::CronError;

#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    InvalidCronExpression(#[from] CronError),

    #[error("No such task: {0}")]
    NoSuchTask(String),

    #[error("Task failed: {0}")]
    Failed(String),

    #[error("Task cancelled")]
    Cancelled,

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error(transparent)]
    Store(#[from] AppError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl JobError {
    pub fn failed(message: impl Into<String>) -> Self {
        JobError::Failed(message.into())
    }
}

impl From<tokio_cron_scheduler::JobSchedulerError> for JobError {
    fn from(error: tokio_cron_scheduler::JobSchedulerError) -> Self {
        JobError::Scheduler(error.to_string())
    }
}

pub type JobResult<T> = Result<T, JobError>;
