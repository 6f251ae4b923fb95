//! Tracing subscriber setup.
//!
//! Console output goes to stderr so command output on stdout stays clean.
//! `RUST_LOG` wins over the configured level.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::garage_config::{GarageConfig, LogFormat};

#[derive(Debug, Clone)]
pub struct LogOptions {
    pub level: String,
    pub format: LogFormat,
    /// Directory for a daily-rolling log file, if any.
    pub file_dir: Option<PathBuf>,
}

impl LogOptions {
    pub fn console(verbose: bool) -> Self {
        Self {
            level: filter_directive("warn", verbose),
            format: LogFormat::Pretty,
            file_dir: None,
        }
    }

    pub fn from_config(config: &GarageConfig, verbose: bool) -> Self {
        let logging = &config.toml.logging;
        Self {
            level: filter_directive(&logging.level, verbose),
            format: logging.format,
            file_dir: logging.file.then(|| config.log_dir()),
        }
    }
}

/// The filter used when `RUST_LOG` is unset. `--verbose` raises it to debug.
fn filter_directive(configured: &str, verbose: bool) -> String {
    if verbose {
        "debug".to_string()
    } else {
        configured.to_lowercase()
    }
}

/// Install the global subscriber.
///
/// Keep the returned guard alive for as long as the file writer should flush.
pub fn init(options: &LogOptions) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&options.level))
        .with_context(|| format!("Invalid log level '{}'", options.level))?;

    let (file_layer, guard) = match &options.file_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "garage.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().json().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry().with(filter).with(file_layer);
    match options.format {
        LogFormat::Pretty => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
    }
    .context("Failed to install tracing subscriber")?;

    Ok(guard)
}
