use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Expected status {expected} for {url}, got {actual}.")]
    UnexpectedStatus {
        expected: u16,
        actual: u16,
        url: String,
    },
    #[error("WS_OPEN while a WebSocket is already open.")]
    WebSocketAlreadyOpen,
    #[error("No WebSocket is open.")]
    WebSocketNotOpen,
    #[error("Receive queue overflow (server is outrunning the recorded message cadence).")]
    ReceiveQueueOverflow,
    #[error("WebSocket closed while waiting for a message.")]
    ReceiveQueueClosed,
    #[error("Expected to be able to parse message: {frame}")]
    UnparseableFrame { frame: String },
    #[error("Expected message '{expected}', received '{received}'.")]
    FrameMismatch { expected: String, received: String },
    #[error("Message key sets differ: expected {{{expected}}}, received {{{received}}}.")]
    KeySetMismatch { expected: String, received: String },
    #[error("Message is missing expected field '{path}': {frame}")]
    MissingField { path: &'static str, frame: String },
    #[error("{message}")]
    Failed { message: String },
}
