//! CLI argument parsing with clap
//!
//! Defines the command-line surface: the scheduler process (`serve`),
//! schema migrations, task definition administration and queue inspection.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use uuid::Uuid;

use crate::build;
use crate::models::QueueState;

/// Distributed persistent task scheduler backed by PostgreSQL
#[derive(Parser, Debug)]
#[command(name = "cronwell")]
#[command(about = "Distributed persistent task scheduler backed by PostgreSQL")]
#[command(long_about = "
cronwell runs cron-scheduled and one-off tasks across a fleet of identical
instances. One instance holds the scheduler lease and emits queue entries on
each cron tick; every instance claims and runs entries as they become due.

EXAMPLES:
    # Start a scheduler instance with default configuration
    cronwell serve

    # Run four tasks at a time and never compete for leadership
    cronwell serve --max-concurrent-tasks 4 --no-scheduler

    # Use a custom configuration file
    cronwell --config /etc/cronwell/production.toml serve

    # Check configuration without starting
    cronwell serve --dry-run

    # Apply pending migrations, or roll back the last one
    cronwell migrate
    cronwell migrate --rollback 1

    # Schedule a task every five minutes and trigger it right away
    cronwell task add hello '*/5 * * * *'
    cronwell enqueue hello

    # Inspect the most recent runs
    cronwell queue list --order-by -created_at --page-size 20
")]
#[command(version = build::CLAP_LONG_VERSION)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Configuration file path
    ///
    /// Use a single TOML file instead of the layered `config/` directory.
    /// The file must exist and be readable.
    ///
    /// Example: --config /etc/cronwell/production.toml
    #[arg(short, long, value_name = "FILE", value_parser = super::validation::validate_config_file_path)]
    pub config: Option<PathBuf>,

    /// Override environment detection
    ///
    /// Selects the `{environment}.toml` overlay instead of CRONWELL_APP_ENV.
    ///
    /// Available values: development (dev), test, staging (stage), production (prod)
    #[arg(short, long, value_enum)]
    pub env: Option<Environment>,

    /// PostgreSQL connection string
    ///
    /// Overrides `db.dsn` from configuration files and CRONWELL_DB__DSN.
    #[arg(long, value_name = "DSN", global = true, value_parser = super::validation::validate_dsn)]
    pub dsn: Option<String>,

    /// Enable verbose logging
    ///
    /// Raises log output to debug level. Cannot be used with --quiet.
    #[arg(short, long)]
    pub verbose: bool,

    /// Suppress non-error output
    ///
    /// Lowers log output to error level. Cannot be used with --verbose.
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a scheduler instance (default)
    ///
    /// Starts the worker loop and, unless disabled, competes for the
    /// scheduler lease. Runs until SIGINT or SIGTERM.
    ///
    /// Examples:
    ///   cronwell serve                              # Start with defaults
    ///   cronwell serve --max-concurrent-tasks 8     # Run up to 8 tasks at once
    ///   cronwell serve --no-scheduler               # Worker only
    ///   cronwell serve --dry-run                    # Validate config without starting
    Serve(ServeArgs),

    /// Database migration operations
    ///
    /// Examples:
    ///   cronwell migrate                    # Apply all pending migrations
    ///   cronwell migrate --dry-run          # Show pending migrations without applying
    ///   cronwell migrate --rollback 1       # Revert the last migration
    Migrate {
        /// Show pending migrations without applying
        #[arg(long, conflicts_with = "rollback")]
        dry_run: bool,

        /// Number of migrations to rollback
        ///
        /// Must be between 1 and 100. Cannot be used with --dry-run.
        #[arg(long, value_name = "STEPS", conflicts_with = "dry_run", value_parser = super::validation::validate_rollback_steps)]
        rollback: Option<u32>,
    },

    /// Manage task definitions
    #[command(subcommand)]
    Task(TaskCommands),

    /// Queue a one-off run of a task
    ///
    /// Inserts a waiting entry and wakes the workers.
    ///
    /// Examples:
    ///   cronwell enqueue hello
    ///   cronwell enqueue report --data '{"day":"2026-01-31"}' --at 2026-02-01T06:00:00Z
    Enqueue {
        /// Task name
        #[arg(value_parser = super::validation::validate_task_name)]
        name: String,

        /// Opaque payload handed to the handler
        #[arg(long, value_name = "STRING")]
        data: Option<String>,

        /// Earliest run time (RFC 3339); defaults to now
        #[arg(long, value_name = "TIMESTAMP", value_parser = super::validation::validate_timestamp)]
        at: Option<jiff::Timestamp>,
    },

    /// Inspect the task queue
    #[command(subcommand)]
    Queue(QueueCommands),

    /// Show the current scheduler lease holder
    Status,
}

/// Options for `serve`
#[derive(Args, Debug, Clone, Default, PartialEq)]
pub struct ServeArgs {
    /// Maximum number of tasks this instance runs at once
    #[arg(long, value_name = "N", value_parser = super::validation::validate_max_concurrent_tasks)]
    pub max_concurrent_tasks: Option<usize>,

    /// Log level override
    ///
    /// Takes precedence over --verbose/--quiet.
    ///
    /// Available levels: error, warn, info, debug, trace
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Run the worker loop only; never become the scheduler leader
    #[arg(long)]
    pub no_scheduler: bool,

    /// Validate configuration and exit
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Subcommand, Debug)]
pub enum TaskCommands {
    /// Create a definition or replace its schedule
    Add {
        #[arg(value_parser = super::validation::validate_task_name)]
        name: String,

        /// Five-field cron expression, e.g. '0 3 * * *'
        #[arg(value_parser = super::validation::validate_cron_expr)]
        cron: String,

        /// Store the definition disabled
        #[arg(long)]
        disabled: bool,
    },
    /// Resume emitting runs for a task
    Enable { name: String },
    /// Stop emitting runs for a task
    Disable { name: String },
    /// Tombstone a task definition
    Remove { name: String },
    /// List task definitions
    List {
        /// Include removed definitions
        #[arg(long)]
        all: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum QueueCommands {
    /// List queue entries
    ///
    /// Time bounds are half-open: `--from` inclusive, `--to` exclusive.
    ///
    /// Examples:
    ///   cronwell queue list --state waiting
    ///   cronwell queue list --from 2026-01-01T00:00:00Z --order-by run_at,-id
    List {
        #[arg(long, value_parser = super::validation::validate_queue_state)]
        state: Option<QueueState>,

        /// Lower bound on run_at
        #[arg(long, value_name = "TIMESTAMP", value_parser = super::validation::validate_timestamp)]
        from: Option<jiff::Timestamp>,

        /// Upper bound on run_at
        #[arg(long, value_name = "TIMESTAMP", value_parser = super::validation::validate_timestamp)]
        to: Option<jiff::Timestamp>,

        /// Lower bound on created_at
        #[arg(long, value_name = "TIMESTAMP", value_parser = super::validation::validate_timestamp)]
        created_from: Option<jiff::Timestamp>,

        /// Upper bound on created_at
        #[arg(long, value_name = "TIMESTAMP", value_parser = super::validation::validate_timestamp)]
        created_to: Option<jiff::Timestamp>,

        /// Comma separated columns, `-` prefix for descending
        #[arg(long, value_name = "COLUMNS")]
        order_by: Option<String>,

        #[arg(long, default_value_t = 1, value_parser = super::validation::validate_page)]
        page: i64,

        #[arg(long, default_value_t = 50, value_parser = super::validation::validate_page_size)]
        page_size: i64,
    },
    /// Show one entry and its logs
    Show { id: Uuid },
    /// Delete one entry and its logs
    Delete { id: Uuid },
}

/// Environment options
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq)]
pub enum Environment {
    #[value(name = "development", alias = "dev")]
    Development,
    #[value(name = "test")]
    Test,
    #[value(name = "staging", alias = "stage")]
    Staging,
    #[value(name = "production", alias = "prod")]
    Production,
}

/// Log level options
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for String {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => "error".to_string(),
            LogLevel::Warn => "warn".to_string(),
            LogLevel::Info => "info".to_string(),
            LogLevel::Debug => "debug".to_string(),
            LogLevel::Trace => "trace".to_string(),
        }
    }
}

impl From<Environment> for crate::config::Environment {
    fn from(env: Environment) -> Self {
        match env {
            Environment::Development => crate::config::Environment::Development,
            Environment::Test => crate::config::Environment::Test,
            Environment::Staging => crate::config::Environment::Staging,
            Environment::Production => crate::config::Environment::Production,
        }
    }
}
