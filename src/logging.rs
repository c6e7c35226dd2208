//! Tracing subscriber setup.
//!
//! `RUST_LOG` wins over `[logging] level`. With `[logging] directory` set,
//! output goes to a daily-rolled file through a non-blocking writer whose
//! guard must be held for the life of the process.

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{LogFormat, LoggingSection};

const LOG_FILE_PREFIX: &str = "portrelay.log";

pub fn build_filter(level: &str) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(level).with_context(|| format!("Invalid log filter '{}'", level)),
    }
}

pub fn init_logging(logging: &LoggingSection) -> Result<Option<WorkerGuard>> {
    let filter = build_filter(&logging.level)?;

    let (writer, guard) = match &logging.directory {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (fmt::writer::BoxMakeWriter::new(writer), Some(guard))
        }
        None => (fmt::writer::BoxMakeWriter::new(std::io::stderr), None),
    };
    let ansi = logging.directory.is_none();

    let registry = tracing_subscriber::registry().with(filter);
    let result = match logging.format {
        LogFormat::Pretty => registry
            .with(fmt::layer().with_writer(writer).with_ansi(ansi))
            .try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(writer).with_current_span(false))
            .try_init(),
    };
    result.context("Failed to install tracing subscriber")?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_garbage_filter() {
        // Only meaningful when RUST_LOG is unset in the test environment.
        if std::env::var_os("RUST_LOG").is_none() {
            assert!(build_filter("portrelay=loud").is_err());
            assert!(build_filter("info,portrelay=debug").is_ok());
        }
    }
}
