//! Configuration loader for cronwell
//!
//! Builds a [`Settings`] from layered TOML files and `CRONWELL_*` environment
//! variables.

use std::path::{Path, PathBuf};

use config::{Config, ConfigBuilder, Environment, File, FileFormat, builder::DefaultState};

use crate::config::environment::Environment as AppEnvironment;
use crate::config::error::ConfigError;
use crate::config::settings::Settings;

/// Environment variable for configuration directory
const CONFIG_DIR_ENV: &str = "CRONWELL_CONFIG_DIR";

/// Environment variable for specific configuration file
const CONFIG_FILE_ENV: &str = "CRONWELL_CONFIG_FILE";

const DEFAULT_CONFIG_DIR: &str = "config";

/// Environment variable prefix for configuration overrides
const ENV_PREFIX: &str = "CRONWELL";

/// Separator for nested configuration keys in environment variables
const ENV_SEPARATOR: &str = "__";

/// Configuration loader that handles layered configuration loading
///
/// Sources, lowest priority first:
/// 1. `default.toml` (required)
/// 2. `{environment}.toml` (optional)
/// 3. `local.toml` (optional)
/// 4. `CRONWELL_*` environment variables
#[derive(Debug)]
pub struct ConfigLoader {
    config_dir: PathBuf,
    /// When set, replaces the layered files with this single file
    config_file: Option<PathBuf>,
    environment: AppEnvironment,
}

impl ConfigLoader {
    /// Create a loader from `CRONWELL_CONFIG_DIR`, `CRONWELL_CONFIG_FILE` and
    /// `CRONWELL_APP_ENV`.
    ///
    /// # Errors
    ///
    /// Returns an error if both `CRONWELL_CONFIG_DIR` and `CRONWELL_CONFIG_FILE`
    /// are set.
    pub fn new() -> Result<Self, ConfigError> {
        let dir_var = std::env::var(CONFIG_DIR_ENV).ok();
        let config_file = std::env::var(CONFIG_FILE_ENV).ok().map(PathBuf::from);

        if config_file.is_some() && dir_var.is_some() {
            return Err(ConfigError::mutual_exclusivity(
                "CRONWELL_CONFIG_DIR and CRONWELL_CONFIG_FILE cannot both be set. \
                 Use CRONWELL_CONFIG_DIR for layered configuration or \
                 CRONWELL_CONFIG_FILE for a single configuration file.",
            ));
        }

        Ok(Self {
            config_dir: dir_var
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_DIR)),
            config_file,
            environment: AppEnvironment::from_env(),
        })
    }

    /// Use a single configuration file (the `--config` flag).
    pub fn with_config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = Some(path.into());
        self
    }

    /// Override the environment overlay (the `--env` flag).
    pub fn with_environment(mut self, environment: AppEnvironment) -> Self {
        self.environment = environment;
        self
    }

    pub fn environment(&self) -> AppEnvironment {
        self.environment
    }

    /// Load and validate configuration from all sources.
    pub fn load(&self) -> Result<Settings, ConfigError> {
        let settings = self.load_unvalidated()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load without validating, so command-line overrides can be applied first.
    pub fn load_unvalidated(&self) -> Result<Settings, ConfigError> {
        let config = self.build_config()?;
        config.try_deserialize().map_err(|e| {
            ConfigError::ParseError(format!("Failed to deserialize configuration: {}", e))
        })
    }

    fn build_config(&self) -> Result<Config, ConfigError> {
        let builder = Config::builder();

        let builder = match self.config_file {
            Some(ref config_file) => Self::add_file_source(builder, config_file, true)?,
            None => self.build_layered_config(builder)?,
        };

        // CRONWELL_DB__DSN -> db.dsn
        let builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator(ENV_SEPARATOR)
                .ignore_empty(true)
                .try_parsing(true),
        );

        builder.build().map_err(ConfigError::from)
    }

    fn build_layered_config(
        &self,
        builder: ConfigBuilder<DefaultState>,
    ) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        let builder =
            Self::add_file_source(builder, &self.config_dir.join("default.toml"), true)?;
        let builder = Self::add_file_source(
            builder,
            &self.config_dir.join(self.environment.overlay_file()),
            false,
        )?;
        Self::add_file_source(builder, &self.config_dir.join("local.toml"), false)
    }

    fn add_file_source(
        builder: ConfigBuilder<DefaultState>,
        path: &Path,
        required: bool,
    ) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        if required && !path.exists() {
            return Err(ConfigError::file_not_found(format!(
                "Required configuration file not found: {}",
                path.display()
            )));
        }

        Ok(builder.add_source(
            File::new(&path.to_string_lossy(), FileFormat::Toml).required(required),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    // Tests mutate process environment variables
    static TEST_MUTEX: Mutex<()> = Mutex::new(());

    const DEFAULT_TOML: &str = r#"
[application]
name = "cronwell-test"
version = "1.0.0"

[db]
dsn = "postgres://localhost/default"
max_open_conns = 10

[scheduler]
probe_interval = "5s"
lease_ttl = "15s"

[worker]
max_concurrent_tasks = 1
"#;

    fn setup_config_dir(files: &[(&str, &str)]) -> TempDir {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        for (name, content) in files {
            fs::write(temp_dir.path().join(name), content).expect("Failed to write config file");
        }
        temp_dir
    }

    /// Restores every touched environment variable on drop.
    struct EnvGuard {
        vars_to_restore: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new() -> Self {
            let mut guard = Self {
                vars_to_restore: Vec::new(),
            };
            for key in [
                CONFIG_DIR_ENV,
                CONFIG_FILE_ENV,
                AppEnvironment::ENV_VAR,
                "CRONWELL_DB__DSN",
                "CRONWELL_WORKER__MAX_CONCURRENT_TASKS",
            ] {
                guard.remove(key);
            }
            guard
        }

        fn set(&mut self, key: &str, value: &str) {
            self.vars_to_restore
                .push((key.to_string(), std::env::var(key).ok()));
            unsafe {
                std::env::set_var(key, value);
            }
        }

        fn remove(&mut self, key: &str) {
            self.vars_to_restore
                .push((key.to_string(), std::env::var(key).ok()));
            unsafe {
                std::env::remove_var(key);
            }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, original) in self.vars_to_restore.iter().rev() {
                unsafe {
                    match original {
                        Some(value) => std::env::set_var(key, value),
                        None => std::env::remove_var(key),
                    }
                }
            }
        }
    }

    #[test]
    fn test_loader_defaults() {
        let _lock = TEST_MUTEX.lock().unwrap();
        let _env = EnvGuard::new();

        let loader = ConfigLoader::new().unwrap();
        assert_eq!(loader.config_dir, PathBuf::from("config"));
        assert!(loader.config_file.is_none());
        assert_eq!(loader.environment(), AppEnvironment::Development);
    }

    #[test]
    fn test_dir_and_file_are_mutually_exclusive() {
        let _lock = TEST_MUTEX.lock().unwrap();
        let mut env = EnvGuard::new();
        env.set(CONFIG_DIR_ENV, "/etc/cronwell");
        env.set(CONFIG_FILE_ENV, "/etc/cronwell.toml");

        match ConfigLoader::new() {
            Err(ConfigError::MutualExclusivityError(msg)) => {
                assert!(msg.contains("CRONWELL_CONFIG_DIR"));
                assert!(msg.contains("CRONWELL_CONFIG_FILE"));
            }
            other => panic!("Expected MutualExclusivityError, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_default_toml() {
        let _lock = TEST_MUTEX.lock().unwrap();
        let mut env = EnvGuard::new();
        let dir = setup_config_dir(&[]);
        env.set(CONFIG_DIR_ENV, dir.path().to_str().unwrap());

        match ConfigLoader::new().unwrap().load() {
            Err(ConfigError::FileNotFound(msg)) => assert!(msg.contains("default.toml")),
            other => panic!("Expected FileNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_layered_precedence() {
        let _lock = TEST_MUTEX.lock().unwrap();
        let mut env = EnvGuard::new();

        let production = r#"
[db]
dsn = "postgres://prod/cronwell"
max_open_conns = 50

[worker]
max_concurrent_tasks = 8
"#;
        let local = r#"
[db]
dsn = "postgres://local/cronwell"
"#;
        let dir = setup_config_dir(&[
            ("default.toml", DEFAULT_TOML),
            ("production.toml", production),
            ("local.toml", local),
        ]);
        env.set(CONFIG_DIR_ENV, dir.path().to_str().unwrap());
        env.set(AppEnvironment::ENV_VAR, "production");
        env.set("CRONWELL_WORKER__MAX_CONCURRENT_TASKS", "16");

        let settings = ConfigLoader::new().unwrap().load().unwrap();

        assert_eq!(settings.worker.max_concurrent_tasks, 16);
        assert_eq!(settings.db.dsn, "postgres://local/cronwell");
        assert_eq!(settings.db.max_open_conns, 50);
        assert_eq!(settings.application.name, "cronwell-test");
        assert_eq!(settings.scheduler.lease_ttl().unwrap(), Duration::from_secs(15));
    }

    #[test]
    fn test_env_var_overrides_dsn() {
        let _lock = TEST_MUTEX.lock().unwrap();
        let mut env = EnvGuard::new();
        let dir = setup_config_dir(&[("default.toml", DEFAULT_TOML)]);
        env.set(CONFIG_DIR_ENV, dir.path().to_str().unwrap());
        env.set("CRONWELL_DB__DSN", "postgres://env/cronwell");

        let settings = ConfigLoader::new().unwrap().load().unwrap();
        assert_eq!(settings.db.dsn, "postgres://env/cronwell");
    }

    #[test]
    fn test_single_file_mode_skips_layers() {
        let _lock = TEST_MUTEX.lock().unwrap();
        let _env = EnvGuard::new();
        let single = r#"
[db]
dsn = "postgres://single/cronwell"

[scheduler]
enabled = false
"#;
        let dir = setup_config_dir(&[("default.toml", DEFAULT_TOML), ("single.toml", single)]);

        let settings = ConfigLoader::new()
            .unwrap()
            .with_config_file(dir.path().join("single.toml"))
            .load()
            .unwrap();

        assert_eq!(settings.db.dsn, "postgres://single/cronwell");
        assert!(!settings.scheduler.enabled);
        assert_eq!(settings.application.name, "cronwell");
    }

    #[test]
    fn test_invalid_settings_fail_validation() {
        let _lock = TEST_MUTEX.lock().unwrap();
        let mut env = EnvGuard::new();
        let broken = r#"
[db]
dsn = "postgres://localhost/cronwell"

[scheduler]
probe_interval = "20s"
lease_ttl = "10s"
"#;
        let dir = setup_config_dir(&[("default.toml", broken)]);
        env.set(CONFIG_DIR_ENV, dir.path().to_str().unwrap());

        let loader = ConfigLoader::new().unwrap();
        assert!(loader.load_unvalidated().is_ok());
        match loader.load() {
            Err(ConfigError::ValidationError { field, .. }) => {
                assert_eq!(field, "scheduler.lease_ttl")
            }
            other => panic!("Expected ValidationError, got {:?}", other),
        }
    }
}
