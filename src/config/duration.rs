//! Duration strings used throughout the configuration (`"500ms"`, `"15m"`, `"1h 30m"`, `"30d"`).

use std::time::Duration;

use crate::config::error::ConfigError;

/// Parses a human-readable duration such as `"5s"`, `"1h30m"` or `"30days"`.
pub fn parse_duration(value: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(value.trim()).map_err(|e| ConfigError::InvalidDuration {
        value: value.to_string(),
        reason: e.to_string(),
    })
}
