//! Logging initialization.
//!
//! Console output plus an optional non-blocking file writer, controlled by
//! [`LoggingConfig`]. The file writer guard lives in a process-wide static
//! so logs keep flushing for the lifetime of the run.

use anyhow::Result;
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use crate::infrastructure::config::LoggingConfig;

// Keeps the non-blocking file writer alive until process exit.
static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Initialize the logging system with default configuration.
pub fn init_logging() -> Result<()> {
    init_logging_with_config(&LoggingConfig::default())
}

/// Initialize the logging system.
///
/// `RUST_LOG` overrides the configured level when set. Safe to call only
/// once per process; later calls return an error from the subscriber.
pub fn init_logging_with_config(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("pricewatch={},sqlx=warn", config.level)));

    let console_layer = config
        .console_output
        .then(|| fmt::layer().with_target(false));

    let file_layer = if config.file_output {
        std::fs::create_dir_all(&config.directory)?;
        let appender = tracing_appender::rolling::daily(&config.directory, "pricewatch.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = LOG_GUARD.set(guard);
        Some(fmt::layer().with_writer(writer).with_ansi(false))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    Ok(())
}
