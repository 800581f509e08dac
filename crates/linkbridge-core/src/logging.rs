//! Logging configuration using tracing

use std::path::{Path, PathBuf};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::Result;

/// Environment variable that overrides the default filter
pub const LOG_ENV: &str = "LINKBRIDGE_LOG";

/// Initialize the logging subsystem
///
/// Logs are written to `log_dir`, or `~/.local/share/linkbridge/logs/` when
/// none is given. Log level is controlled by the `LINKBRIDGE_LOG` environment
/// variable.
///
/// # Examples
/// ```bash
/// LINKBRIDGE_LOG=debug linkbridge
/// LINKBRIDGE_LOG=linkbridge_app::network=trace linkbridge
/// ```
pub fn init(log_dir: Option<&Path>) -> Result<()> {
    let log_dir = log_dir
        .map(Path::to_path_buf)
        .unwrap_or_else(default_log_directory);
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, "linkbridge.log");

    let env_filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new("linkbridge=info,linkbridge_app=info,warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(file_appender)
                .with_ansi(false)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_timer(fmt::time::ChronoLocal::new(
                    "%Y-%m-%d %H:%M:%S%.3f".to_string(),
                )),
        )
        .init();

    tracing::info!("═══════════════════════════════════════════════════════");
    tracing::info!("linkbridge {} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!("Log directory: {}", log_dir.display());
    tracing::info!("═══════════════════════════════════════════════════════");

    Ok(())
}

fn default_log_directory() -> PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join("linkbridge").join("logs")
}
