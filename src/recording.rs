//! Recording file parsing and the typed event model.
//!
//! A recording is a line-oriented log captured from one real browser session:
//! each non-comment line is a JSON object tagged with an event `type` and an
//! ISO-8601 `created` timestamp. The loader keeps physical 1-based line
//! numbers (comment lines included) so failures during playback point back at
//! the source line.

use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::error::{AppResult, RecordingError};

#[derive(Debug, Clone)]
pub struct Recording {
    pub events: Vec<Event>,
}

#[derive(Debug, Clone)]
pub struct Event {
    /// Recorded wall-clock time, epoch milliseconds.
    pub created: i64,
    /// Physical 1-based line number in the recording file.
    pub line_number: usize,
    pub kind: EventKind,
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub url: String,
    pub method: String,
    pub status_code: u16,
}

#[derive(Debug, Clone)]
pub enum EventKind {
    Req(HttpRequest),
    ReqHome(HttpRequest),
    ReqSinf(HttpRequest),
    ReqTok(HttpRequest),
    ReqPostUpload { status_code: u16, body: Vec<u8> },
    WsOpen { url: String },
    WsRecv { message: String },
    WsRecvInit { message: String },
    WsRecvBeginUpload { message: String },
    WsSend { message: String },
    WsClose,
}

impl EventKind {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            EventKind::Req(_) => "REQ",
            EventKind::ReqHome(_) => "REQ_HOME",
            EventKind::ReqSinf(_) => "REQ_SINF",
            EventKind::ReqTok(_) => "REQ_TOK",
            EventKind::ReqPostUpload { .. } => "REQ_POST_UPLOAD",
            EventKind::WsOpen { .. } => "WS_OPEN",
            EventKind::WsRecv { .. } => "WS_RECV",
            EventKind::WsRecvInit { .. } => "WS_RECV_INIT",
            EventKind::WsRecvBeginUpload { .. } => "WS_RECV_BEGIN_UPLOAD",
            EventKind::WsSend { .. } => "WS_SEND",
            EventKind::WsClose => "WS_CLOSE",
        }
    }
}

impl Recording {
    /// Recorded span between the first and last event, in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> i64 {
        match (self.events.first(), self.events.last()) {
            (Some(first), Some(last)) => (last.created - first.created).max(0),
            _ => 0,
        }
    }

    /// Endurance runs restart sessions back to back; that only works when
    /// the script tears its WebSocket down at the end.
    pub fn validate(&self) -> Result<(), RecordingError> {
        let last = self.events.last().ok_or(RecordingError::Empty)?;
        if !matches!(last.kind, EventKind::WsClose) {
            return Err(RecordingError::LastEventNotClose {
                last: last.kind.name(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
enum WireEvent {
    Req {
        created: String,
        url: String,
        method: String,
        #[serde(rename = "statusCode")]
        status_code: u16,
    },
    ReqHome {
        created: String,
        url: String,
        method: String,
        #[serde(rename = "statusCode")]
        status_code: u16,
    },
    ReqSinf {
        created: String,
        url: String,
        method: String,
        #[serde(rename = "statusCode")]
        status_code: u16,
    },
    ReqTok {
        created: String,
        url: String,
        method: String,
        #[serde(rename = "statusCode")]
        status_code: u16,
    },
    ReqPostUpload {
        created: String,
        #[serde(rename = "statusCode")]
        status_code: u16,
        data: String,
    },
    WsOpen {
        created: String,
        url: String,
    },
    WsRecv {
        created: String,
        message: String,
    },
    WsRecvInit {
        created: String,
        message: String,
    },
    WsRecvBeginUpload {
        created: String,
        message: String,
    },
    WsSend {
        created: String,
        message: String,
    },
    WsClose {
        created: String,
    },
}

/// Load and parse a recording file.
///
/// Lines beginning with `#` are comments; they are skipped but still advance
/// the physical line counter carried on each event.
///
/// # Errors
///
/// Returns a [`RecordingError`] when the file cannot be read, a line cannot
/// be parsed, or the recording is empty.
pub async fn load_recording(path: &Path) -> AppResult<Recording> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|err| RecordingError::Io {
            path: path.to_path_buf(),
            source: err,
        })?;
    let mut reader = BufReader::new(file);
    let mut line = String::new();
    let mut line_number = 0usize;
    let mut events = Vec::new();

    loop {
        line.clear();
        let bytes = reader
            .read_line(&mut line)
            .await
            .map_err(|err| RecordingError::Io {
                path: path.to_path_buf(),
                source: err,
            })?;
        if bytes == 0 {
            break;
        }
        line_number += 1;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        events.push(parse_line(trimmed, line_number)?);
    }

    if events.is_empty() {
        return Err(RecordingError::Empty.into());
    }
    Ok(Recording { events })
}

fn parse_line(line: &str, line_number: usize) -> Result<Event, RecordingError> {
    let wire: WireEvent =
        serde_json::from_str(line).map_err(|err| RecordingError::Line {
            line_number,
            source: err,
        })?;

    let (created, kind) = match wire {
        WireEvent::Req {
            created,
            url,
            method,
            status_code,
        } => (
            created,
            EventKind::Req(HttpRequest {
                url,
                method,
                status_code,
            }),
        ),
        WireEvent::ReqHome {
            created,
            url,
            method,
            status_code,
        } => (
            created,
            EventKind::ReqHome(HttpRequest {
                url,
                method,
                status_code,
            }),
        ),
        WireEvent::ReqSinf {
            created,
            url,
            method,
            status_code,
        } => (
            created,
            EventKind::ReqSinf(HttpRequest {
                url,
                method,
                status_code,
            }),
        ),
        WireEvent::ReqTok {
            created,
            url,
            method,
            status_code,
        } => (
            created,
            EventKind::ReqTok(HttpRequest {
                url,
                method,
                status_code,
            }),
        ),
        WireEvent::ReqPostUpload {
            created,
            status_code,
            data,
        } => {
            let body = BASE64
                .decode(data.as_bytes())
                .map_err(|err| RecordingError::InvalidBase64 {
                    line_number,
                    source: err,
                })?;
            (created, EventKind::ReqPostUpload { status_code, body })
        }
        WireEvent::WsOpen { created, url } => (created, EventKind::WsOpen { url }),
        WireEvent::WsRecv { created, message } => (created, EventKind::WsRecv { message }),
        WireEvent::WsRecvInit { created, message } => {
            (created, EventKind::WsRecvInit { message })
        }
        WireEvent::WsRecvBeginUpload { created, message } => {
            (created, EventKind::WsRecvBeginUpload { message })
        }
        WireEvent::WsSend { created, message } => (created, EventKind::WsSend { message }),
        WireEvent::WsClose { created } => (created, EventKind::WsClose),
    };

    let created = chrono::DateTime::parse_from_rfc3339(&created)
        .map_err(|_| RecordingError::InvalidTimestamp {
            line_number,
            value: created.clone(),
        })?
        .timestamp_millis();

    Ok(Event {
        created,
        line_number,
        kind,
    })
}
