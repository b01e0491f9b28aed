//! Logger
//!
//! A `tracing-subscriber` registry with:
//! - a reloadable `EnvFilter` so the level can change at runtime
//! - console output with color control
//! - optional file output (full, compact or JSON) with size rotation

pub mod config;
pub mod error;
pub(crate) mod writer;

pub use config::{ConsoleConfig, FileConfig, LogFormat, LoggerConfig, parse_level};
pub use error::LoggerError;

use std::io::IsTerminal;

use tracing_subscriber::{
    EnvFilter, Layer, Registry, fmt,
    layer::{Layered, SubscriberExt},
    reload,
    util::SubscriberInitExt,
};
use writer::RotatingFileWriter;

type FilteredRegistry = Layered<reload::Layer<EnvFilter, Registry>, Registry>;
type BoxedLayer = Box<dyn Layer<FilteredRegistry> + Send + Sync + 'static>;

/// Handle for changing the active log level after the subscriber is installed.
#[derive(Clone)]
pub struct LogLevelHandle {
    inner: reload::Handle<EnvFilter, Registry>,
}

impl LogLevelHandle {
    /// Replaces the filter with `level` (trace, debug, info, warn, error).
    pub fn set_level(&self, level: &str) -> Result<(), LoggerError> {
        parse_level(level)?;
        self.inner
            .reload(EnvFilter::new(level.to_lowercase()))
            .map_err(|e| LoggerError::config(e.to_string()))
    }
}

/// Installs the global subscriber described by `config`.
pub fn init_logger(config: LoggerConfig) -> Result<LogLevelHandle, LoggerError> {
    config.validate()?;

    let filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let (filter_layer, handle) = reload::Layer::new(filter);

    // File layer first so console ANSI settings do not leak into span fields
    // written to the file.
    let mut layers: Vec<BoxedLayer> = Vec::new();
    if config.file.enabled {
        layers.push(file_layer(&config.file)?);
    }
    if config.console.enabled {
        let use_ansi = config.console.colored && std::io::stdout().is_terminal();
        layers.push(
            fmt::layer()
                .with_ansi(use_ansi)
                .with_target(true)
                .with_level(true)
                .boxed(),
        );
    }

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(layers)
        .try_init()
        .map_err(|e| LoggerError::init(e.to_string()))?;

    Ok(LogLevelHandle { inner: handle })
}

fn file_layer(config: &FileConfig) -> Result<BoxedLayer, LoggerError> {
    let writer = RotatingFileWriter::new(config)?;

    let layer = match config.format {
        LogFormat::Full => fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .with_writer(writer)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .compact()
            .with_writer(writer)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .with_ansi(false)
            .json()
            .with_current_span(true)
            .with_writer(writer)
            .boxed(),
    };

    Ok(layer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_handle_rejects_unknown_level() {
        let (_layer, inner) = reload::Layer::<EnvFilter, Registry>::new(EnvFilter::new("info"));
        let handle = LogLevelHandle { inner };
        assert!(handle.set_level("chatty").is_err());
    }

    #[test]
    fn test_level_handle_reloads_filter() {
        let (layer, inner) = reload::Layer::<EnvFilter, Registry>::new(EnvFilter::new("info"));
        let _subscriber = tracing_subscriber::registry().with(layer);
        let handle = LogLevelHandle { inner };

        handle.set_level("DEBUG").unwrap();
        let current = handle.inner.with_current(|f| f.to_string()).unwrap();
        assert_eq!(current, "debug");
    }
}
