use std::path::Path;
use std::sync::Arc;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::args::LogLevel;
use crate::error::AppResult;

/// Install the global subscriber: a console layer at the configured level
/// (`SHINYCANNON_LOG`/`RUST_LOG` override it) and, when `debug_log_path` is
/// given, a plain-text debug layer writing to that file.
///
/// # Errors
///
/// Returns an error if the debug log file cannot be created.
pub fn init_logging(level: LogLevel, debug_log_path: Option<&Path>) -> AppResult<()> {
    let console_filter = std::env::var("SHINYCANNON_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .map_or_else(
            |_| EnvFilter::new(level.as_filter()),
            |value| EnvFilter::try_new(value).unwrap_or_else(|_| EnvFilter::new(level.as_filter())),
        );

    let console = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(console_filter);
    let registry = tracing_subscriber::registry().with(console);

    let result = match debug_log_path {
        Some(path) => {
            let file = std::fs::File::create(path)?;
            let file_layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Arc::new(file))
                .with_filter(EnvFilter::new("debug"));
            registry.with(file_layer).try_init()
        }
        None => registry.try_init(),
    };

    if let Err(err) = result {
        eprintln!("Failed to set global default subscriber: {}", err);
    }
    Ok(())
}
