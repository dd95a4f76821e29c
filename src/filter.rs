//! Server-to-client WebSocket frame classification.
//!
//! Shiny deployments speak SockJS: a data frame is `a["<payload>"]` where the
//! payload is a JSON-encoded string. When reconnects are enabled the payload
//! carries a message-id prefix (`a["1A#0|m|...`) which is normalized away
//! before matching. Operational frames (heartbeats, ACKs, busy/progress
//! notifications, reactlog echoes, empty diffs) are dropped before they reach
//! the session's receive queue; everything else must line up with a scripted
//! `WS_RECV` event.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::error::SessionError;

static MESSAGE_ID_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^a\["[0-9A-F]+#"#).expect("valid message-id regex"));

static INNER_MESSAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^a\["(\*#)?0\|m\|(.*)"\]$"#).expect("valid inner-message regex"));

static EMPTY_DIFF: LazyLock<Value> =
    LazyLock::new(|| serde_json::json!({"errors": [], "values": [], "inputMessages": []}));

const IGNORABLE_KEYS: [&str; 3] = ["busy", "progress", "recalculating"];

/// Extract the Shiny message object from a raw text frame.
///
/// Returns `None` for frames that carry no payload object: the SockJS open
/// frame (`"o"`), and anything that is neither a SockJS data frame nor a bare
/// JSON object (dev servers send the latter, without SockJS framing).
pub fn parse_message(frame: &str) -> Option<Map<String, Value>> {
    let normalized = MESSAGE_ID_PREFIX.replace(frame, r#"a["*#"#);
    if let Some(captures) = INNER_MESSAGE.captures(&normalized) {
        let encoded = captures.get(2)?.as_str();
        // Group 2 is the interior of a JSON string; re-wrap to decode escapes.
        let decoded: String = serde_json::from_str(&format!("\"{}\"", encoded)).ok()?;
        return as_object(serde_json::from_str(&decoded).ok()?);
    }
    if frame == "o" {
        return None;
    }
    as_object(serde_json::from_str(frame).ok()?)
}

/// Decide whether a received frame is operational noise.
///
/// # Errors
///
/// Returns [`SessionError::UnparseableFrame`] for a frame that is neither a
/// known ignorable form nor a parseable Shiny message; the session treats
/// that as fatal.
pub fn can_ignore(frame: &str) -> Result<bool, SessionError> {
    if frame == "o" {
        return Ok(false);
    }
    if frame == "h" || frame.starts_with(r#"a["ACK"#) || frame.starts_with(r#"["ACK"#) {
        return Ok(true);
    }

    let object = parse_message(frame).ok_or_else(|| SessionError::UnparseableFrame {
        frame: frame.to_owned(),
    })?;

    if IGNORABLE_KEYS.iter().any(|key| object.contains_key(*key)) {
        return Ok(true);
    }
    if object.len() == 1 {
        if let Some(Value::Object(custom)) = object.get("custom") {
            if custom.len() == 1 && custom.contains_key("reactlog") {
                return Ok(true);
            }
        }
    }
    if Value::Object(object) == *EMPTY_DIFF {
        return Ok(true);
    }
    Ok(false)
}

fn as_object(value: Value) -> Option<Map<String, Value>> {
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}
