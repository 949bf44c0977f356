// Logging setup - stderr for whoever is watching, a rolling file for cron runs nobody watches

use anyhow::Result;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Installs the global subscriber. Keep the returned guard alive until exit or
/// the tail of the file log is lost.
pub fn init(verbose: bool) -> Result<WorkerGuard> {
    let log_dir = log_dir();
    std::fs::create_dir_all(&log_dir)?;

    // Daily rotating file appender
    let file_appender = tracing_appender::rolling::daily(&log_dir, "spotify-snapshot.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let default_filter = if verbose {
        "info,spotify_snapshot=debug"
    } else {
        "info,spotify_snapshot=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time();

    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_target(true)
        .with_level(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()?;

    Ok(guard)
}

fn log_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("spotify-snapshot")
        .join("logs")
}
