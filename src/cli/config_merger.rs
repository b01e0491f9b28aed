//! Configuration merger for CLI arguments and config files
//!
//! Command-line flags sit above every file and environment source. Settings
//! are loaded unvalidated, overridden, and validated once at the end.

use super::parser::{Cli, Commands, ServeArgs};
use crate::config::error::ConfigError;
use crate::config::{ConfigLoader, settings::Settings};

/// Applies CLI overrides on top of file-based configuration
pub struct ConfigurationMerger {
    base_config: Settings,
}

impl ConfigurationMerger {
    pub fn new(base_config: Settings) -> Self {
        Self { base_config }
    }

    /// Load the base configuration honouring `--config` and `--env`.
    ///
    /// # Errors
    /// Returns ConfigError if files are missing or cannot be parsed
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        let mut loader = ConfigLoader::new()?;
        if let Some(ref path) = cli.config {
            loader = loader.with_config_file(path);
        }
        if let Some(env) = cli.env {
            loader = loader.with_environment(env.into());
        }

        Ok(Self::new(loader.load_unvalidated()?))
    }

    /// Merge CLI arguments with the base configuration and validate the result
    pub fn merge_cli_args(&self, cli: &Cli) -> Result<Settings, ConfigError> {
        let mut config = self.base_config.clone();

        self.apply_global_overrides(&mut config, cli);

        if let Some(ref command) = cli.command {
            self.apply_command_overrides(&mut config, command);
        }

        config.validate()?;

        Ok(config)
    }

    fn apply_global_overrides(&self, config: &mut Settings, cli: &Cli) {
        if let Some(ref dsn) = cli.dsn {
            config.db.dsn = dsn.clone();
        }

        if cli.verbose {
            config.logger.level = "debug".to_string();
        } else if cli.quiet {
            config.logger.level = "error".to_string();
        }
    }

    fn apply_command_overrides(&self, config: &mut Settings, command: &Commands) {
        if let Commands::Serve(ServeArgs {
            max_concurrent_tasks,
            log_level,
            no_scheduler,
            dry_run: _,
        }) = command
        {
            if let Some(n) = max_concurrent_tasks {
                config.worker.max_concurrent_tasks = *n;
            }

            if *no_scheduler {
                config.scheduler.enabled = false;
            }

            // Takes precedence over --verbose/--quiet
            if let Some(level) = log_level {
                config.logger.level = (*level).into();
            }
        }
    }

    pub fn config(&self) -> &Settings {
        &self.base_config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn create_valid_base_config() -> Settings {
        let mut config = Settings::default();
        config.db.dsn = "postgres://localhost/cronwell".to_string();
        config
    }

    fn merge(args: &[&str]) -> Result<Settings, ConfigError> {
        let cli = Cli::try_parse_from(args).unwrap();
        ConfigurationMerger::new(create_valid_base_config()).merge_cli_args(&cli)
    }

    #[test]
    fn test_configuration_merger_new() {
        let base_config = create_valid_base_config();
        let merger = ConfigurationMerger::new(base_config.clone());
        assert_eq!(merger.config(), &base_config);
    }

    #[test]
    fn test_no_flags_keeps_base() {
        let merged = merge(&["cronwell"]).unwrap();
        assert_eq!(merged, create_valid_base_config());
    }

    #[test]
    fn test_verbose_and_quiet() {
        assert_eq!(merge(&["cronwell", "--verbose"]).unwrap().logger.level, "debug");
        assert_eq!(merge(&["cronwell", "--quiet"]).unwrap().logger.level, "error");
    }

    #[test]
    fn test_command_log_level_beats_global_flag() {
        let merged = merge(&["cronwell", "--quiet", "serve", "--log-level", "trace"]).unwrap();
        assert_eq!(merged.logger.level, "trace");
    }

    #[test]
    fn test_serve_overrides() {
        let merged = merge(&[
            "cronwell",
            "serve",
            "--max-concurrent-tasks",
            "6",
            "--no-scheduler",
        ])
        .unwrap();
        assert_eq!(merged.worker.max_concurrent_tasks, 6);
        assert!(!merged.scheduler.enabled);
    }

    #[test]
    fn test_dsn_override_makes_config_valid() {
        let cli = Cli::try_parse_from(["cronwell", "--dsn", "postgres://other/cronwell", "status"])
            .unwrap();
        let merged = ConfigurationMerger::new(Settings::default())
            .merge_cli_args(&cli)
            .unwrap();
        assert_eq!(merged.db.dsn, "postgres://other/cronwell");
    }

    #[test]
    fn test_merged_config_is_validated() {
        let cli = Cli::try_parse_from(["cronwell", "status"]).unwrap();
        match ConfigurationMerger::new(Settings::default()).merge_cli_args(&cli) {
            Err(ConfigError::ValidationError { field, .. }) => assert_eq!(field, "db.dsn"),
            other => panic!("Expected ValidationError, got {:?}", other),
        }
    }
}
