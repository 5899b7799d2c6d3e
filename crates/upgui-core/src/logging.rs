//! Logging configuration using tracing

use std::path::Path;

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::Result;

/// Initialize the logging subsystem.
///
/// Logs are written to `<log_dir>/upgui.log` with daily rotation.
/// Log level is controlled by the `UPGUI_LOG` environment variable.
///
/// # Examples
/// ```bash
/// UPGUI_LOG=debug upgui
/// UPGUI_LOG=trace upgui
/// ```
pub fn init(log_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, "upgui.log");

    // Default to info, allow override via UPGUI_LOG
    let env_filter =
        EnvFilter::try_from_env("UPGUI_LOG").unwrap_or_else(|_| EnvFilter::new("upgui=info,warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(file_appender)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(true)
                .with_line_number(true)
                .with_timer(fmt::time::ChronoLocal::new(
                    "%Y-%m-%d %H:%M:%S%.3f".to_string(),
                )),
        )
        .init();

    tracing::info!("uPlexa GUI backend starting");
    tracing::info!("Log directory: {}", log_dir.display());

    Ok(())
}
