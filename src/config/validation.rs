//! Configuration validation logic
//!
//! Each section validates itself; [`Settings::validate`] runs them in file
//! order and returns the first failure.

use crate::config::error::ConfigError;
use crate::config::settings::{
    DbConfig, FileSettings, LoggerSettings, MaintenanceConfig, SchedulerConfig, Settings,
    WorkerConfig,
};
use crate::jobs::cron::CronSchedule;

/// Valid log levels
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Valid log formats
const VALID_LOG_FORMATS: &[&str] = &["full", "compact", "json"];

impl DbConfig {
    /// # Validation Rules
    /// - DSN must be a `postgres://` or `postgresql://` URL
    /// - `max_open_conns` must be greater than 0 and at least `max_idle_conns`
    /// - All durations must parse and be non-zero
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dsn.trim().is_empty() {
            return Err(ConfigError::validation(
                "db.dsn",
                "Database DSN is required. Set db.dsn or CRONWELL_DB__DSN.",
            ));
        }

        if !["postgres://", "postgresql://"]
            .iter()
            .any(|scheme| self.dsn.starts_with(scheme))
        {
            return Err(ConfigError::validation(
                "db.dsn",
                "Invalid DSN. Expected format: postgres://[user:password@]host[:port]/database",
            ));
        }

        if self.max_open_conns == 0 {
            return Err(ConfigError::validation(
                "db.max_open_conns",
                "Max open connections must be greater than 0.",
            ));
        }

        if self.max_idle_conns > self.max_open_conns {
            return Err(ConfigError::ValidationError {
                field: "db.max_idle_conns".to_string(),
                message: format!(
                    "Max idle connections ({}) cannot exceed max open connections ({}).",
                    self.max_idle_conns, self.max_open_conns
                ),
            });
        }

        self.max_idle_time()?;
        if self.timeout()?.is_zero() {
            return Err(ConfigError::validation(
                "db.timeout",
                "Query timeout must be greater than 0.",
            ));
        }
        if self.connect_timeout()?.is_zero() {
            return Err(ConfigError::validation(
                "db.connect_timeout",
                "Connect timeout must be greater than 0.",
            ));
        }

        Ok(())
    }
}

impl SchedulerConfig {
    /// # Validation Rules
    /// - `probe_interval` and `sync_interval` must be non-zero
    /// - `lease_ttl` must exceed `probe_interval`
    pub fn validate(&self) -> Result<(), ConfigError> {
        let probe = self.probe_interval()?;
        if probe.is_zero() {
            return Err(ConfigError::validation(
                "scheduler.probe_interval",
                "Probe interval must be greater than 0.",
            ));
        }

        let ttl = self.lease_ttl()?;
        if ttl <= probe {
            return Err(ConfigError::ValidationError {
                field: "scheduler.lease_ttl".to_string(),
                message: format!(
                    "Lease TTL ({}) must exceed the probe interval ({}); 3x is recommended.",
                    self.lease_ttl, self.probe_interval
                ),
            });
        }

        if self.sync_interval()?.is_zero() {
            return Err(ConfigError::validation(
                "scheduler.sync_interval",
                "Sync interval must be greater than 0.",
            ));
        }

        Ok(())
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_tasks == 0 {
            return Err(ConfigError::validation(
                "worker.max_concurrent_tasks",
                "Max concurrent tasks must be greater than 0.",
            ));
        }

        if self.channel_capacity == 0 {
            return Err(ConfigError::validation(
                "worker.channel_capacity",
                "Channel capacity must be greater than 0.",
            ));
        }

        if self.backfill_page_size <= 0 {
            return Err(ConfigError::validation(
                "worker.backfill_page_size",
                "Backfill page size must be greater than 0.",
            ));
        }

        self.shutdown_deadline()?;
        self.stale_threshold()?;
        Ok(())
    }
}

impl MaintenanceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.log_retention()?.is_zero() {
            return Err(ConfigError::validation(
                "maintenance.log_retention",
                "Log retention must be greater than 0.",
            ));
        }

        if let Err(e) = self.schedule.parse::<CronSchedule>() {
            return Err(ConfigError::ValidationError {
                field: "maintenance.schedule".to_string(),
                message: e.to_string(),
            });
        }

        if self.page_size <= 0 {
            return Err(ConfigError::validation(
                "maintenance.page_size",
                "Page size must be greater than 0.",
            ));
        }

        Ok(())
    }
}

impl FileSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && self.path.trim().is_empty() {
            return Err(ConfigError::validation(
                "logger.file.path",
                "File path is required when file logging is enabled.",
            ));
        }

        if !VALID_LOG_FORMATS.contains(&self.format.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError {
                field: "logger.file.format".to_string(),
                message: format!(
                    "Invalid log format '{}'. Valid formats are: {}",
                    self.format,
                    VALID_LOG_FORMATS.join(", ")
                ),
            });
        }

        if self.enabled && self.rotation.max_size == 0 {
            return Err(ConfigError::validation(
                "logger.file.rotation.max_size",
                "Max size must be greater than 0.",
            ));
        }

        Ok(())
    }
}

impl LoggerSettings {
    /// Log level must be one of: trace, debug, info, warn, error.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !VALID_LOG_LEVELS.contains(&self.level.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError {
                field: "logger.level".to_string(),
                message: format!(
                    "Invalid log level '{}'. Valid levels are: {}",
                    self.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }

        self.file.validate()
    }
}

impl Settings {
    /// Validate all configuration settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.db.validate()?;
        self.scheduler.validate()?;
        self.worker.validate()?;
        self.maintenance.validate()?;
        self.logger.validate()?;
        Ok(())
    }
}
