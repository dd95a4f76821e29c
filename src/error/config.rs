use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Output directory '{path}' already exists (pass --overwrite-output to replace it).")]
    OutputDirExists { path: PathBuf },
    #[error("Failed to prepare output directory '{path}': {source}")]
    OutputDirIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("SHINYCANNON_USER and SHINYCANNON_PASS must be set together.")]
    PartialCredentials,
    #[error("Invalid app URL '{url}': {source}")]
    InvalidAppUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("App URL '{url}' must use the http or https scheme.")]
    UnsupportedScheme { url: String },
}
