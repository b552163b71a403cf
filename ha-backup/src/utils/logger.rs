//! Logging configuration using tracing.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogConfig, LogOutput};

/// Initialize logging with the specified level.
///
/// `RUST_LOG` takes precedence over the configured level. When file output
/// is selected the returned guard must be held until exit so buffered lines
/// are flushed.
pub fn init(level: &str, log: &LogConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    match log.output {
        LogOutput::Stdout => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_target(false))
                .try_init()?;
            Ok(None)
        }
        LogOutput::File => {
            let (writer, guard) = file_writer(&log.directory)?;
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(writer)
                        .with_ansi(false)
                        .with_target(false),
                )
                .try_init()?;
            Ok(Some(guard))
        }
    }
}

fn file_writer(
    directory: &Path,
) -> anyhow::Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    std::fs::create_dir_all(directory)?;

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("ha-backup")
        .filename_suffix("log")
        .max_log_files(30)
        .build(directory)?;

    Ok(tracing_appender::non_blocking(appender))
}
