use anyhow::{Context, Result};
use std::path::Path;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, time::SystemTime},
    prelude::*,
    EnvFilter,
};

use crate::constants::DIAGNOSTICS_LOG_FILE;

/// Overrides `level` with full `EnvFilter` directives.
pub const LOG_FILTER_ENV: &str = "BOOTWATCH_LOG";

/// Installs the diagnostics subscriber writing to `<log_dir>/bootwatch.log`,
/// rotated daily. Fails if a global subscriber is already set.
pub fn setup_logging(log_dir: &Path, level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_env(LOG_FILTER_ENV).unwrap_or_else(|_| EnvFilter::new(level));

    let file_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, DIAGNOSTICS_LOG_FILE);

    let file_layer = fmt::layer()
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_target(true)
        .with_level(true)
        .with_ansi(false)
        .with_timer(SystemTime)
        .with_writer(file_appender);

    let subscriber = tracing_subscriber::registry().with(filter).with(file_layer);

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    tracing::info!(
        log_file = %log_dir.join(DIAGNOSTICS_LOG_FILE).display(),
        log_level = level,
        "Diagnostics logging started"
    );
    Ok(())
}
