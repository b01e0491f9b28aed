//! Five-field cron expressions.
//!
//! Expressions are checked here so a bad schedule is rejected when a
//! definition is written, not when the emitter first tries to schedule it.
//! Parsing goes through `croner`, the grammar `tokio-cron-scheduler` runs
//! on. The scheduler takes six fields, so a `0` seconds field is prepended
//! by [`CronSchedule::scheduler_expr`].

use std::fmt;
use std::str::FromStr;

use croner::Cron;
use thiserror::Error;

const FIELD_COUNT: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid cron expression '{expr}': {reason}")]
pub struct CronError {
    pub expr: String,
    pub reason: String,
}

/// A validated `minute hour day-of-month month day-of-week` expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    expr: String,
}

impl CronSchedule {
    /// The normalized five-field expression.
    pub fn as_str(&self) -> &str {
        &self.expr
    }

    /// Six-field form understood by `tokio-cron-scheduler`, firing at second 0.
    pub fn scheduler_expr(&self) -> String {
        format!("0 {}", self.expr)
    }

    /// First firing strictly after `after`, or `None` if the schedule never fires again.
    pub fn next_after(&self, after: jiff::Timestamp) -> Option<jiff::Timestamp> {
        let cron = Cron::from_str(&self.scheduler_expr()).ok()?;
        let start = chrono::DateTime::<chrono::Utc>::from_timestamp(after.as_second(), after.subsec_nanosecond() as u32)?;
        let next = cron.find_next_occurrence(&start, false).ok()?;
        jiff::Timestamp::new(next.timestamp(), next.timestamp_subsec_nanos() as i32).ok()
    }
}

impl FromStr for CronSchedule {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fail = |reason: String| CronError {
            expr: s.to_string(),
            reason,
        };

        // Seconds, years and `@nicknames` are not part of the five-field form
        let fields: Vec<&str> = s.split_whitespace().collect();
        if fields.len() != FIELD_COUNT {
            return Err(fail(format!(
                "expected {} fields, found {}",
                FIELD_COUNT,
                fields.len()
            )));
        }

        let schedule = Self {
            expr: fields.join(" "),
        };
        Cron::from_str(&schedule.scheduler_expr()).map_err(|e| fail(e.to_string()))?;
        Ok(schedule)
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expr)
    }
}
