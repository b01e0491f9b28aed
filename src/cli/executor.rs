//! Command executor for dispatching CLI commands

use super::handlers::{
    MigrateCommandHandler, QueueCommandHandler, ServeCommandHandler, StatusCommandHandler,
    TaskCommandHandler,
};
use super::parser::{Cli, Commands};
use crate::config::settings::Settings;

/// Execute a CLI command with merged, validated settings
///
/// No subcommand means `serve` with default options.
///
/// # Errors
/// Returns errors from command handlers; `serve` also fails when its
/// shutdown deadline is exceeded
pub async fn execute_command(cli: Cli, settings: Settings) -> anyhow::Result<()> {
    match cli.command {
        None => ServeCommandHandler::new(settings).execute(false).await,
        Some(Commands::Serve(args)) => ServeCommandHandler::new(settings).execute(args.dry_run).await,
        Some(Commands::Migrate { dry_run, rollback }) => {
            MigrateCommandHandler::new(settings)
                .execute(dry_run, rollback)
                .await?;
            Ok(())
        }
        Some(Commands::Task(command)) => {
            TaskCommandHandler::new(settings).execute(&command).await?;
            Ok(())
        }
        Some(Commands::Enqueue { name, data, at }) => {
            QueueCommandHandler::new(settings)
                .enqueue(&name, data.as_deref(), at)
                .await?;
            Ok(())
        }
        Some(Commands::Queue(command)) => {
            QueueCommandHandler::new(settings).execute(&command).await?;
            Ok(())
        }
        Some(Commands::Status) => {
            StatusCommandHandler::new(settings).execute().await?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn create_valid_config() -> Settings {
        let mut config = Settings::default();
        config.db.dsn = "postgres://localhost/cronwell".to_string();
        config
    }

    #[tokio::test]
    async fn test_execute_serve_dry_run() {
        let cli = Cli::try_parse_from(["cronwell", "serve", "--dry-run"]).unwrap();
        assert!(execute_command(cli, create_valid_config()).await.is_ok());
    }

    #[tokio::test]
    async fn test_execute_serve_dry_run_rejects_invalid_config() {
        let cli = Cli::try_parse_from(["cronwell", "serve", "--dry-run"]).unwrap();
        let mut config = create_valid_config();
        config.worker.max_concurrent_tasks = 0;
        assert!(execute_command(cli, config).await.is_err());
    }
}
