//! Configuration settings structures for cronwell
//!
//! Every section deserializes with defaults so that a minimal `default.toml`
//! only needs `db.dsn`. Duration-valued keys are kept as strings and parsed
//! on access; [`Settings::validate`] guarantees they parse.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::duration::parse_duration;
use crate::config::error::ConfigError;
use crate::logger::{ConsoleConfig, FileConfig, LogFormat, LoggerConfig};

// ============================================================================
// Default value functions
// ============================================================================

fn default_app_name() -> String {
    "cronwell".to_string()
}

fn default_app_version() -> String {
    crate::pkg_version().to_string()
}

fn default_max_open_conns() -> u32 {
    10
}

fn default_max_idle_conns() -> u32 {
    2
}

fn default_max_idle_time() -> String {
    "15m".to_string()
}

fn default_db_timeout() -> String {
    "5s".to_string()
}

fn default_connect_timeout() -> String {
    "30s".to_string()
}

fn default_probe_interval() -> String {
    "5s".to_string()
}

fn default_lease_ttl() -> String {
    "15s".to_string()
}

fn default_sync_interval() -> String {
    "1m".to_string()
}

fn default_max_concurrent_tasks() -> usize {
    1
}

fn default_shutdown_deadline() -> String {
    "30s".to_string()
}

fn default_stale_threshold() -> String {
    "1m".to_string()
}

fn default_backfill_page_size() -> i64 {
    500
}

fn default_channel_capacity() -> usize {
    64
}

fn default_log_retention() -> String {
    "30d".to_string()
}

fn default_maintenance_schedule() -> String {
    "0 3 * * *".to_string()
}

fn default_maintenance_page_size() -> i64 {
    50_000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_log_path() -> String {
    "logs/cronwell.log".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_max_size() -> u64 {
    10 * 1024 * 1024 // 10MB
}

fn default_max_files() -> usize {
    5
}

fn duration_of(field: &str, value: &str) -> Result<Duration, ConfigError> {
    parse_duration(value).map_err(|e| e.in_field(field))
}

// ============================================================================
// Application Configuration
// ============================================================================

/// Application basic information configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    #[serde(default = "default_app_name")]
    pub name: String,

    #[serde(default = "default_app_version")]
    pub version: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            version: default_app_version(),
        }
    }
}

// ============================================================================
// Database Configuration
// ============================================================================

/// Relational store connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbConfig {
    /// PostgreSQL connection string
    #[serde(default)]
    pub dsn: String,

    /// Upper bound on pooled connections
    #[serde(default = "default_max_open_conns")]
    pub max_open_conns: u32,

    /// Connections kept open while idle
    #[serde(default = "default_max_idle_conns")]
    pub max_idle_conns: u32,

    /// Idle connections older than this are closed
    #[serde(default = "default_max_idle_time")]
    pub max_idle_time: String,

    /// Per-query deadline
    #[serde(default = "default_db_timeout")]
    pub timeout: String,

    /// Deadline for checking a connection out of the pool
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: String,

    /// Run pending migrations on `serve`
    #[serde(default)]
    pub auto_migrate: bool,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            dsn: String::new(),
            max_open_conns: default_max_open_conns(),
            max_idle_conns: default_max_idle_conns(),
            max_idle_time: default_max_idle_time(),
            timeout: default_db_timeout(),
            connect_timeout: default_connect_timeout(),
            auto_migrate: false,
        }
    }
}

impl DbConfig {
    pub fn max_idle_time(&self) -> Result<Duration, ConfigError> {
        duration_of("db.max_idle_time", &self.max_idle_time)
    }

    pub fn timeout(&self) -> Result<Duration, ConfigError> {
        duration_of("db.timeout", &self.timeout)
    }

    pub fn connect_timeout(&self) -> Result<Duration, ConfigError> {
        duration_of("db.connect_timeout", &self.connect_timeout)
    }
}

// ============================================================================
// Scheduler Configuration
// ============================================================================

/// Leader lease and cron emitter settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Whether this instance competes for leadership
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_probe_interval")]
    pub probe_interval: String,

    #[serde(default = "default_lease_ttl")]
    pub lease_ttl: String,

    /// How often a leader re-reads task definitions
    #[serde(default = "default_sync_interval")]
    pub sync_interval: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            probe_interval: default_probe_interval(),
            lease_ttl: default_lease_ttl(),
            sync_interval: default_sync_interval(),
        }
    }
}

impl SchedulerConfig {
    pub fn probe_interval(&self) -> Result<Duration, ConfigError> {
        duration_of("scheduler.probe_interval", &self.probe_interval)
    }

    pub fn lease_ttl(&self) -> Result<Duration, ConfigError> {
        duration_of("scheduler.lease_ttl", &self.lease_ttl)
    }

    pub fn sync_interval(&self) -> Result<Duration, ConfigError> {
        duration_of("scheduler.sync_interval", &self.sync_interval)
    }
}

// ============================================================================
// Worker Configuration
// ============================================================================

/// Worker loop settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,

    #[serde(default = "default_shutdown_deadline")]
    pub shutdown_deadline: String,

    /// Scan for waiting entries with lost notifications on startup
    #[serde(default = "default_true")]
    pub backfill: bool,

    /// Minimum age of a waiting entry before backfill picks it up
    #[serde(default = "default_stale_threshold")]
    pub stale_threshold: String,

    #[serde(default = "default_backfill_page_size")]
    pub backfill_page_size: i64,

    /// Capacity of the listener-to-dispatch channel
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: default_max_concurrent_tasks(),
            shutdown_deadline: default_shutdown_deadline(),
            backfill: true,
            stale_threshold: default_stale_threshold(),
            backfill_page_size: default_backfill_page_size(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl WorkerConfig {
    pub fn shutdown_deadline(&self) -> Result<Duration, ConfigError> {
        duration_of("worker.shutdown_deadline", &self.shutdown_deadline)
    }

    pub fn stale_threshold(&self) -> Result<Duration, ConfigError> {
        duration_of("worker.stale_threshold", &self.stale_threshold)
    }
}

// ============================================================================
// Maintenance Configuration
// ============================================================================

/// Settings for the built-in `log_retention` task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    /// Completed entries older than this are deleted
    #[serde(default = "default_log_retention")]
    pub log_retention: String,

    /// Cron expression the retention task is registered with
    #[serde(default = "default_maintenance_schedule")]
    pub schedule: String,

    /// Rows deleted per page
    #[serde(default = "default_maintenance_page_size")]
    pub page_size: i64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            log_retention: default_log_retention(),
            schedule: default_maintenance_schedule(),
            page_size: default_maintenance_page_size(),
        }
    }
}

impl MaintenanceConfig {
    pub fn log_retention(&self) -> Result<Duration, ConfigError> {
        duration_of("maintenance.log_retention", &self.log_retention)
    }
}

// ============================================================================
// Logger Settings
// ============================================================================

/// Console output settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_true")]
    pub colored: bool,
}

impl Default for ConsoleSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            colored: true,
        }
    }
}

/// Size-based rotation for the log file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationSettings {
    /// Maximum file size in bytes before rotation
    #[serde(default = "default_max_size")]
    pub max_size: u64,

    /// Maximum number of rotated files to keep
    #[serde(default = "default_max_files")]
    pub max_files: usize,
}

impl Default for RotationSettings {
    fn default() -> Self {
        Self {
            max_size: default_max_size(),
            max_files: default_max_files(),
        }
    }
}

/// File output settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSettings {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_log_path")]
    pub path: String,

    #[serde(default = "default_true")]
    pub append: bool,

    /// Log format: "full", "compact", or "json"
    #[serde(default = "default_log_format")]
    pub format: String,

    #[serde(default)]
    pub rotation: RotationSettings,
}

impl Default for FileSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            path: default_log_path(),
            append: true,
            format: default_log_format(),
            rotation: RotationSettings::default(),
        }
    }
}

/// Logger configuration settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggerSettings {
    /// Log level or `EnvFilter` directive
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub console: ConsoleSettings,

    #[serde(default)]
    pub file: FileSettings,
}

impl Default for LoggerSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            console: ConsoleSettings::default(),
            file: FileSettings::default(),
        }
    }
}

impl LoggerSettings {
    /// Converts the file representation into the runtime [`LoggerConfig`].
    pub fn into_logger_config(self) -> Result<LoggerConfig, ConfigError> {
        let format = self
            .file
            .format
            .parse::<LogFormat>()
            .map_err(|e| ConfigError::validation("logger.file.format".to_string(), e.to_string()))?;

        let file = FileConfig {
            enabled: self.file.enabled,
            path: PathBuf::from(self.file.path),
            append: self.file.append,
            format,
            max_size: self.file.rotation.max_size,
            max_files: self.file.rotation.max_files,
        };
        let console = ConsoleConfig {
            enabled: self.console.enabled,
            colored: self.console.colored,
        };

        LoggerConfig::new(console, file, self.level)
            .map_err(|e| ConfigError::validation("logger".to_string(), e.to_string()))
    }
}

// ============================================================================
// Settings
// ============================================================================

/// Root configuration
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub application: ApplicationConfig,

    #[serde(default)]
    pub db: DbConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub worker: WorkerConfig,

    #[serde(default)]
    pub maintenance: MaintenanceConfig,

    #[serde(default)]
    pub logger: LoggerSettings,
}
