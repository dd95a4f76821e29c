//! Per-event playback handlers.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::error::{AppError, AppResult, SessionError};
use crate::filter;
use crate::recording::{Event, EventKind, HttpRequest};

use super::Session;

static WORKER_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)<base href="_w_([0-9a-z]+)/"#).expect("valid worker regex"));

/// 200 and 304 are interchangeable for replayed GETs: whether the browser's
/// cache was warm when the recording was taken has nothing to do with the
/// server under test.
fn get_status_equals(expected: u16, actual: u16) -> bool {
    const OK_EQUIVALENT: [u16; 2] = [200, 304];
    expected == actual || (OK_EQUIVALENT.contains(&expected) && OK_EQUIVALENT.contains(&actual))
}

impl Session {
    pub(super) async fn handle_event(&mut self, event: &Event) -> AppResult<()> {
        match &event.kind {
            EventKind::Req(request) | EventKind::ReqSinf(request) => {
                self.http_get(request).await?;
                Ok(())
            }
            EventKind::ReqHome(request) => self.handle_req_home(request).await,
            EventKind::ReqTok(request) => self.handle_req_tok(request).await,
            EventKind::ReqPostUpload { status_code, body } => {
                self.handle_post_upload(*status_code, body).await
            }
            EventKind::WsOpen { url } => self.open_web_socket(url).await,
            EventKind::WsRecv { message } => self.handle_ws_recv(message).await,
            EventKind::WsRecvInit { .. } => self.handle_ws_recv_init().await,
            EventKind::WsRecvBeginUpload { .. } => self.handle_ws_recv_begin_upload().await,
            EventKind::WsSend { message } => self.send_frame(message).await,
            EventKind::WsClose => self.close_web_socket().await,
        }
    }

    async fn http_get(&self, request: &HttpRequest) -> AppResult<String> {
        let path = self.substitute(&request.url)?;
        let url = format!("{}{}", self.http_base, path);
        debug!(session_id = self.session_id, "GET {}", url);
        let response = self.client.get(&url).send().await?;
        let actual = response.status().as_u16();
        if !get_status_equals(request.status_code, actual) {
            return Err(AppError::session(SessionError::UnexpectedStatus {
                expected: request.status_code,
                actual,
                url,
            }));
        }
        Ok(response.text().await?)
    }

    /// The initial page GET. Hosted servers bake a worker id into the page's
    /// `<base href>`; a dev server serves the page without one.
    async fn handle_req_home(&mut self, request: &HttpRequest) -> AppResult<()> {
        let body = self.http_get(request).await?;
        match WORKER_ID.captures(&body).and_then(|captures| captures.get(1)) {
            Some(worker) => {
                debug!(session_id = self.session_id, "Worker id {}", worker.as_str());
                self.dictionary
                    .insert("WORKER".to_owned(), worker.as_str().to_owned());
            }
            None => {
                debug!(
                    session_id = self.session_id,
                    "No worker id in home page, assuming dev server"
                );
            }
        }
        Ok(())
    }

    async fn handle_req_tok(&mut self, request: &HttpRequest) -> AppResult<()> {
        let body = self.http_get(request).await?;
        self.dictionary.insert("TOKEN".to_owned(), body);
        Ok(())
    }

    async fn handle_post_upload(&self, expected: u16, body: &[u8]) -> AppResult<()> {
        let upload_url = self.token_value("UPLOAD_URL")?.to_owned();
        let target = if upload_url.starts_with("http://") || upload_url.starts_with("https://") {
            upload_url
        } else {
            format!("{}/{}", self.http_base, upload_url.trim_start_matches('/'))
        };
        debug!(session_id = self.session_id, "POST {}", target);
        let response = self.client.post(&target).body(body.to_vec()).send().await?;
        let actual = response.status().as_u16();
        if actual != expected {
            return Err(AppError::session(SessionError::UnexpectedStatus {
                expected,
                actual,
                url: target,
            }));
        }
        Ok(())
    }

    async fn handle_ws_recv(&mut self, expected: &str) -> AppResult<()> {
        let received = self.take_frame().await?;
        let expected = self.substitute(expected)?;

        let Some(expected_object) = filter::parse_message(&expected) else {
            // No payload object on the expected side: compare verbatim.
            if expected == received {
                return Ok(());
            }
            return Err(AppError::session(SessionError::FrameMismatch {
                expected,
                received,
            }));
        };

        let received_object =
            filter::parse_message(&received).ok_or_else(|| SessionError::UnparseableFrame {
                frame: received.clone(),
            })?;

        let expected_keys: std::collections::BTreeSet<&str> =
            expected_object.keys().map(String::as_str).collect();
        let received_keys: std::collections::BTreeSet<&str> =
            received_object.keys().map(String::as_str).collect();
        if expected_keys != received_keys {
            return Err(AppError::session(SessionError::KeySetMismatch {
                expected: expected_keys.into_iter().collect::<Vec<_>>().join(", "),
                received: received_keys.into_iter().collect::<Vec<_>>().join(", "),
            }));
        }
        if expected_object != received_object {
            debug!(
                session_id = self.session_id,
                "Message values differ under matching keys: expected {}, received {}",
                expected,
                received
            );
        }
        Ok(())
    }

    async fn handle_ws_recv_init(&mut self) -> AppResult<()> {
        let received = self.take_frame().await?;
        let object =
            filter::parse_message(&received).ok_or_else(|| SessionError::UnparseableFrame {
                frame: received.clone(),
            })?;
        let session_id = object
            .get("config")
            .and_then(|config| config.get("sessionId"))
            .and_then(Value::as_str)
            .ok_or_else(|| SessionError::MissingField {
                path: "config.sessionId",
                frame: received.clone(),
            })?;
        debug!(session_id = self.session_id, "Shiny session {}", session_id);
        self.dictionary
            .insert("SESSION".to_owned(), session_id.to_owned());
        Ok(())
    }

    async fn handle_ws_recv_begin_upload(&mut self) -> AppResult<()> {
        let received = self.take_frame().await?;
        let object =
            filter::parse_message(&received).ok_or_else(|| SessionError::UnparseableFrame {
                frame: received.clone(),
            })?;
        let value = object
            .get("response")
            .and_then(|response| response.get("value"));
        let job_id = value
            .and_then(|value| value.get("jobId"))
            .and_then(scalar_string)
            .ok_or_else(|| SessionError::MissingField {
                path: "response.value.jobId",
                frame: received.clone(),
            })?;
        let upload_url = value
            .and_then(|value| value.get("uploadUrl"))
            .and_then(scalar_string)
            .ok_or_else(|| SessionError::MissingField {
                path: "response.value.uploadUrl",
                frame: received.clone(),
            })?;
        debug!(
            session_id = self.session_id,
            "Upload job {} at {}", job_id, upload_url
        );
        self.dictionary.insert("UPLOAD_JOB_ID".to_owned(), job_id);
        self.dictionary.insert("UPLOAD_URL".to_owned(), upload_url);
        Ok(())
    }
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}
