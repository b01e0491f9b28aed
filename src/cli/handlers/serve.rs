//! Serve command handler
//!
//! Runs the scheduler process, or validates configuration with `--dry-run`.

use crate::config::settings::Settings;
use crate::error::AppResult;
use crate::server::Server;

/// Handler for the serve command
pub struct ServeCommandHandler {
    config: Settings,
}

impl ServeCommandHandler {
    pub fn new(config: Settings) -> Self {
        Self { config }
    }

    /// Execute the serve command with optional dry-run support
    ///
    /// # Errors
    /// - Configuration validation errors
    /// - Startup failures and an exceeded shutdown deadline (if not dry-run)
    pub async fn execute(self, dry_run: bool) -> anyhow::Result<()> {
        if dry_run {
            self.validate_only()?;
            return Ok(());
        }

        Server::new(self.config).run().await
    }

    /// Validate configuration without connecting to the database
    pub fn validate_only(&self) -> AppResult<()> {
        self.config.validate()?;

        let worker = &self.config.worker;
        let scheduler = &self.config.scheduler;
        println!("✓ Configuration is valid");
        println!("✓ Database DSN is configured");
        println!(
            "✓ Worker runs up to {} task(s) at once, shutdown deadline {}",
            worker.max_concurrent_tasks, worker.shutdown_deadline
        );
        if scheduler.enabled {
            println!(
                "✓ Scheduler lease: probe every {}, TTL {}",
                scheduler.probe_interval, scheduler.lease_ttl
            );
        } else {
            println!("✓ Scheduler disabled, this instance only runs tasks");
        }
        println!(
            "✓ Log retention: {} on '{}'",
            self.config.maintenance.log_retention, self.config.maintenance.schedule
        );

        println!("Dry run completed successfully - configuration is ready for deployment");
        Ok(())
    }

    pub fn config(&self) -> &Settings {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_valid_config() -> Settings {
        let mut config = Settings::default();
        config.db.dsn = "postgres://localhost/cronwell".to_string();
        config
    }

    #[test]
    fn test_serve_handler_new() {
        let config = create_valid_config();
        let handler = ServeCommandHandler::new(config.clone());
        assert_eq!(handler.config(), &config);
    }

    #[tokio::test]
    async fn test_serve_handler_dry_run() {
        let handler = ServeCommandHandler::new(create_valid_config());
        assert!(handler.execute(true).await.is_ok());
    }

    #[tokio::test]
    async fn test_serve_handler_dry_run_invalid_config() {
        let mut config = create_valid_config();
        config.scheduler.lease_ttl = "1s".to_string();
        let handler = ServeCommandHandler::new(config);
        assert!(handler.execute(true).await.is_err());
    }
}
