use thiserror::Error;

use super::{AuthError, ConfigError, RecordingError, SessionError, TokenError};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
    #[error("JSON error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
    #[error("HTTP client error: {source}")]
    Reqwest {
        #[from]
        source: reqwest::Error,
    },
    #[error("WebSocket error: {source}")]
    WebSocket { source: Box<tokio_tungstenite::tungstenite::Error> },
    #[error("Invalid URL: {source}")]
    Url {
        #[from]
        source: url::ParseError,
    },
    #[error("Join error: {source}")]
    Join {
        #[from]
        source: tokio::task::JoinError,
    },
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Recording error: {0}")]
    Recording(#[from] RecordingError),
    #[error("Token error: {0}")]
    Token(#[from] TokenError),
    #[error("Session error: {0}")]
    Session(#[from] SessionError),
    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn config<E>(error: E) -> Self
    where
        E: Into<ConfigError>,
    {
        error.into().into()
    }

    pub fn session<E>(error: E) -> Self
    where
        E: Into<SessionError>,
    {
        error.into().into()
    }

    pub fn auth<E>(error: E) -> Self
    where
        E: Into<AuthError>,
    {
        error.into().into()
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for AppError {
    fn from(source: tokio_tungstenite::tungstenite::Error) -> Self {
        AppError::WebSocket {
            source: Box::new(source),
        }
    }
}
