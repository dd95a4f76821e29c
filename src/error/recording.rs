use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecordingError {
    #[error("Failed to read recording '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Recording line {line_number} is not a valid event: {source}")]
    Line {
        line_number: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("Recording line {line_number} has an invalid timestamp '{value}'.")]
    InvalidTimestamp { line_number: usize, value: String },
    #[error("Recording line {line_number} has invalid base64 data: {source}")]
    InvalidBase64 {
        line_number: usize,
        #[source]
        source: base64::DecodeError,
    },
    #[error("Recording contains no events.")]
    Empty,
    #[error("Recording must end with a WS_CLOSE event (last event is {last}).")]
    LastEventNotClose { last: &'static str },
}
