//! CLI argument validation functions
//!
//! Value parsers for arguments that need more than clap's built-in checks.

use std::fs;
use std::path::PathBuf;

use crate::jobs::CronSchedule;
use crate::models::QueueState;
use crate::repositories::pagination::MAX_PAGE_SIZE;

/// Validate that a file path is accessible (exists and is readable)
pub fn validate_config_file_path(path_str: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(path_str);

    if !path.exists() {
        return Err(format!("Configuration file does not exist: '{}'", path_str));
    }

    if !path.is_file() {
        return Err(format!("Configuration path is not a file: '{}'", path_str));
    }

    match fs::File::open(&path) {
        Ok(_) => Ok(path),
        Err(e) => Err(format!("Cannot read configuration file '{}': {}", path_str, e)),
    }
}

/// Validate rollback steps is between 1 and 100
pub fn validate_rollback_steps(steps_str: &str) -> Result<u32, String> {
    let steps: u32 = steps_str.parse().map_err(|_| {
        format!("Rollback steps must be a valid positive number, got: '{}'", steps_str)
    })?;

    if steps == 0 {
        return Err("Rollback steps must be greater than 0".to_string());
    }

    if steps > 100 {
        return Err("Rollback steps cannot exceed 100 for safety reasons".to_string());
    }

    Ok(steps)
}

pub fn validate_dsn(dsn: &str) -> Result<String, String> {
    let dsn = dsn.trim();
    if dsn.starts_with("postgres://") || dsn.starts_with("postgresql://") {
        Ok(dsn.to_string())
    } else {
        Err("DSN must start with postgres:// or postgresql://".to_string())
    }
}

pub fn validate_max_concurrent_tasks(value: &str) -> Result<usize, String> {
    let n: usize = value
        .parse()
        .map_err(|_| format!("Expected a positive number, got: '{}'", value))?;
    if n == 0 {
        return Err("Max concurrent tasks must be greater than 0".to_string());
    }
    Ok(n)
}

/// Task names become `task.name` keys and log fields: non-empty, no whitespace.
pub fn validate_task_name(name: &str) -> Result<String, String> {
    if name.is_empty() {
        return Err("Task name cannot be empty".to_string());
    }
    if name.chars().any(char::is_whitespace) {
        return Err(format!("Task name cannot contain whitespace: '{}'", name));
    }
    if name.len() > 255 {
        return Err("Task name is too long (maximum 255 characters)".to_string());
    }
    Ok(name.to_string())
}

pub fn validate_cron_expr(expr: &str) -> Result<String, String> {
    expr.parse::<CronSchedule>()
        .map(|schedule| schedule.as_str().to_string())
        .map_err(|e| e.to_string())
}

/// Parse an RFC 3339 timestamp such as `2026-01-31T06:00:00Z`
pub fn validate_timestamp(value: &str) -> Result<jiff::Timestamp, String> {
    value
        .parse::<jiff::Timestamp>()
        .map_err(|e| format!("Invalid timestamp '{}': {}", value, e))
}

/// Accepts `waiting`, `running`, `complete` or `stopped`
pub fn validate_queue_state(value: &str) -> Result<QueueState, String> {
    value.parse::<QueueState>()
}

pub fn validate_page(value: &str) -> Result<i64, String> {
    let page: i64 = value
        .parse()
        .map_err(|_| format!("Page must be a number, got: '{}'", value))?;
    if page < 1 {
        return Err("Page must be at least 1".to_string());
    }
    // Any page size up to the maximum must yield a representable offset
    if (page - 1).checked_mul(MAX_PAGE_SIZE).is_none() {
        return Err(format!("Page {} is out of range", page));
    }
    Ok(page)
}

pub fn validate_page_size(value: &str) -> Result<i64, String> {
    let size: i64 = value
        .parse()
        .map_err(|_| format!("Page size must be a number, got: '{}'", value))?;
    if !(1..=MAX_PAGE_SIZE).contains(&size) {
        return Err(format!("Page size must be between 1 and {}", MAX_PAGE_SIZE));
    }
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rollback_steps() {
        assert_eq!(validate_rollback_steps("1").unwrap(), 1);
        assert_eq!(validate_rollback_steps("100").unwrap(), 100);
        for bad in ["0", "101", "-1", "abc", ""] {
            assert!(validate_rollback_steps(bad).is_err(), "'{}' should be invalid", bad);
        }
    }

    #[test]
    fn test_config_file_path() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("cronwell.toml");
        std::fs::write(&file, "[db]\n").unwrap();

        assert_eq!(validate_config_file_path(file.to_str().unwrap()).unwrap(), file);
        assert!(validate_config_file_path(dir.path().to_str().unwrap()).is_err());
        assert!(validate_config_file_path("/nonexistent/cronwell.toml").is_err());
    }

    #[test]
    fn test_dsn() {
        assert!(validate_dsn("postgres://localhost/cronwell").is_ok());
        assert!(validate_dsn("postgresql://u:p@db:5432/cronwell").is_ok());
        assert!(validate_dsn("mysql://localhost/db").is_err());
        assert!(validate_dsn("").is_err());
    }

    #[test]
    fn test_task_name() {
        assert!(validate_task_name("log_retention").is_ok());
        assert!(validate_task_name("").is_err());
        assert!(validate_task_name("two words").is_err());
        assert!(validate_task_name(&"x".repeat(256)).is_err());
    }

    #[test]
    fn test_cron_expr() {
        assert_eq!(validate_cron_expr("*/5 * * * *").unwrap(), "*/5 * * * *");
        assert!(validate_cron_expr("0 0 3 * * *").is_err());
        assert!(validate_cron_expr("61 * * * *").is_err());
    }

    #[test]
    fn test_timestamp() {
        let ts = validate_timestamp("2026-01-31T06:00:00Z").unwrap();
        assert_eq!(ts.as_second(), 1_769_839_200);
        assert!(validate_timestamp("2026-01-31T06:00:00+01:00").is_ok());
        assert!(validate_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_paging() {
        assert!(validate_page("1").is_ok());
        assert!(validate_page("0").is_err());
        assert!(validate_page("9223372036854775807").is_err());
        assert!(validate_page(&(i64::MAX / MAX_PAGE_SIZE).to_string()).is_ok());
        assert!(validate_page_size("1000").is_ok());
        assert!(validate_page_size("1001").is_err());
        assert!(validate_page_size("0").is_err());
    }

    #[test]
    fn test_max_concurrent_tasks() {
        assert_eq!(validate_max_concurrent_tasks("8").unwrap(), 8);
        assert!(validate_max_concurrent_tasks("0").is_err());
        assert!(validate_max_concurrent_tasks("-2").is_err());
    }
}
