//! Command-line arguments and environment credentials.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use serde::Serialize;

use crate::auth::Credentials;
use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, ValueEnum, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    #[must_use]
    pub const fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Parser, Serialize)]
#[command(
    name = "shinycannon",
    version,
    about = "Replays a recorded Shiny session against a live application with many concurrent virtual users."
)]
pub struct PlayerArgs {
    /// Path to the recording file to replay
    pub recording_path: PathBuf,

    /// Base URL of the target Shiny application
    pub app_url: String,

    /// Number of concurrent virtual users
    #[arg(long, default_value_t = 1)]
    pub workers: usize,

    /// Minutes to keep restarting sessions after all workers have warmed up
    /// (0 runs exactly one session per worker)
    #[arg(long = "loaded-duration-minutes", default_value_t = 0.0)]
    pub loaded_duration_minutes: f64,

    /// Directory for session CSVs and run artifacts
    #[arg(long = "output-dir", default_value_t = default_output_dir())]
    pub output_dir: String,

    /// Delete and recreate the output directory if it already exists
    #[arg(long = "overwrite-output")]
    pub overwrite_output: bool,

    /// Milliseconds between worker starts during ramp-up
    /// (default: recording duration / workers)
    #[arg(long = "start-interval")]
    pub start_interval: Option<u64>,

    /// Console log level
    #[arg(long = "log-level", value_enum, default_value_t = LogLevel::Warn)]
    pub log_level: LogLevel,

    /// Also write a debug-level log to <output-dir>/debug.log
    #[arg(long = "debug-log")]
    pub debug_log: bool,
}

fn default_output_dir() -> String {
    format!(
        "test-logs-{}",
        chrono::Utc::now().format("%Y-%m-%dT%H-%M-%S")
    )
}

/// Read `SHINYCANNON_USER`/`SHINYCANNON_PASS`.
///
/// # Errors
///
/// Returns [`ConfigError::PartialCredentials`] when only one of the two is
/// set.
pub fn credentials_from_env() -> Result<Option<Credentials>, ConfigError> {
    let user = std::env::var("SHINYCANNON_USER").ok();
    let password = std::env::var("SHINYCANNON_PASS").ok();
    match (user, password) {
        (Some(user), Some(password)) => Ok(Some(Credentials { user, password })),
        (None, None) => Ok(None),
        _ => Err(ConfigError::PartialCredentials),
    }
}
