//! Task command handler
//!
//! Administers task definitions: the rows the cron emitter schedules from.

use super::{connect, format_timestamp};
use crate::cli::parser::TaskCommands;
use crate::config::settings::Settings;
use crate::error::AppResult;
use crate::jobs::CronSchedule;
use crate::models::TaskDefinition;

/// Handler for `task add|enable|disable|remove|list`
pub struct TaskCommandHandler {
    config: Settings,
}

impl TaskCommandHandler {
    pub fn new(config: Settings) -> Self {
        Self { config }
    }

    /// # Errors
    /// - Database connection errors
    /// - `NotFound` when enabling, disabling or removing an unknown task
    pub async fn execute(&self, command: &TaskCommands) -> AppResult<()> {
        let repos = connect(&self.config).await?;
        let tasks = &repos.tasks;

        match command {
            TaskCommands::Add {
                name,
                cron,
                disabled,
            } => {
                let task = tasks.upsert(name, cron, !disabled).await?;
                println!("✓ Task '{}' scheduled at '{}'", task.name, task.cron_expr);
                if !task.enabled {
                    println!("  (disabled: run `cronwell task enable {}` to start it)", task.name);
                }
            }
            TaskCommands::Enable { name } => {
                tasks.set_enabled(name, true).await?;
                println!("✓ Task '{}' enabled", name);
            }
            TaskCommands::Disable { name } => {
                tasks.set_enabled(name, false).await?;
                println!("✓ Task '{}' disabled", name);
            }
            TaskCommands::Remove { name } => {
                tasks.tombstone(name).await?;
                println!("✓ Task '{}' removed", name);
            }
            TaskCommands::List { all } => {
                let definitions = tasks.list(*all).await?;
                if definitions.is_empty() {
                    println!("No task definitions");
                } else {
                    let now = jiff::Timestamp::now();
                    println!("{}", task_header());
                    for task in &definitions {
                        println!("{}", task_row(task, now));
                    }
                }
            }
        }

        Ok(())
    }
}

fn task_header() -> String {
    format!(
        "{:<24} {:<20} {:<9} {:<23} {}",
        "NAME", "SCHEDULE", "STATUS", "NEXT RUN", "UPDATED"
    )
}

fn task_row(task: &TaskDefinition, now: jiff::Timestamp) -> String {
    let status = match (task.deleted, task.enabled) {
        (true, _) => "removed",
        (false, true) => "enabled",
        (false, false) => "disabled",
    };
    // Only enabled definitions are scheduled
    let next_run = task
        .cron_expr
        .parse::<CronSchedule>()
        .ok()
        .filter(|_| task.enabled && !task.deleted)
        .and_then(|schedule| schedule.next_after(now))
        .map(format_timestamp)
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{:<24} {:<20} {:<9} {:<23} {}",
        task.name,
        task.cron_expr,
        status,
        next_run,
        format_timestamp(task.updated_at())
    )
}
