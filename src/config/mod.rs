//! Configuration management
//!
//! Layered configuration loading with support for:
//! - TOML configuration files
//! - Environment variable overrides
//! - Multiple environment configurations (development, test, staging, production)
//!
//! # Configuration Priority (lowest to highest)
//! 1. `default.toml` - Base default configuration
//! 2. `{environment}.toml` - Environment-specific configuration
//! 3. `local.toml` - Local development overrides (not committed to version control)
//! 4. `CRONWELL_*` environment variables

pub mod duration;
pub mod environment;
pub mod error;
pub mod loader;
pub mod settings;
pub mod validation;

pub use duration::parse_duration;
pub use environment::Environment;
pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use settings::{
    DbConfig, LoggerSettings, MaintenanceConfig, SchedulerConfig, Settings, WorkerConfig,
};
