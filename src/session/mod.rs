//! Per-virtual-user session state and the playback run loop.
//!
//! One worker owns one `Session` at a time. A session holds its own cookie
//! jar (shared between the HTTP client and the WebSocket handshake), the
//! token dictionary discovered while replaying, at most one WebSocket, and a
//! bounded queue fed by the socket's reader task. Replay pacing follows the
//! recording's timestamps: sleeps are computed against the previous event's
//! recorded time, so a slow handler compresses later sleeps but playback
//! never runs ahead of the recorded cadence.

mod handlers;
mod ws;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use reqwest::cookie::Jar;
use reqwest::Client;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use url::Url;

use crate::auth::{self, Credentials};
use crate::error::{AppError, AppResult, ConfigError, TokenError};
use crate::output::SessionLog;
use crate::recording::{Event, EventKind, Recording};
use crate::stats::{Stats, Transition};
use crate::tokens;

pub(crate) const RECEIVE_QUEUE_CAPACITY: usize = 5;

const USER_AGENT: &str = concat!("shinycannon/", env!("CARGO_PKG_VERSION"));

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

pub const ALLOWED_TOKENS: [&str; 7] = [
    "WORKER",
    "TOKEN",
    "ROBUST_ID",
    "SOCKJSID",
    "SESSION",
    "UPLOAD_URL",
    "UPLOAD_JOB_ID",
];

pub struct Session {
    pub session_id: u64,
    pub worker_id: usize,
    pub iteration: u64,
    base_url: Url,
    http_base: String,
    ws_base: String,
    client: Client,
    cookie_jar: Arc<Jar>,
    allowed_tokens: BTreeSet<String>,
    dictionary: BTreeMap<String, String>,
    web_socket: Option<ws::WsHandle>,
    receive_queue: Option<mpsc::Receiver<ws::QueueItem>>,
    failure: Arc<Mutex<Option<String>>>,
    last_event_ended: i64,
    credentials: Option<Credentials>,
    stats: Arc<Stats>,
}

impl Session {
    /// Build a fresh session against `app_url` with its own cookie jar and
    /// seeded token dictionary.
    ///
    /// # Errors
    ///
    /// Fails on an unparseable or non-HTTP app URL, or if the HTTP client
    /// cannot be constructed.
    pub fn new(
        app_url: &str,
        session_id: u64,
        worker_id: usize,
        iteration: u64,
        credentials: Option<Credentials>,
        stats: Arc<Stats>,
    ) -> AppResult<Self> {
        let base_url = Url::parse(app_url).map_err(|err| ConfigError::InvalidAppUrl {
            url: app_url.to_owned(),
            source: err,
        })?;
        let http_base = app_url.trim_end_matches('/').to_owned();
        let ws_base = match base_url.scheme() {
            // ws:// mirrors http://, wss:// mirrors https://
            "http" | "https" => format!("ws{}", &http_base["http".len()..]),
            _ => {
                return Err(ConfigError::UnsupportedScheme {
                    url: app_url.to_owned(),
                }
                .into())
            }
        };

        let cookie_jar = Arc::new(Jar::default());
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .cookie_provider(Arc::clone(&cookie_jar))
            .timeout(HTTP_TIMEOUT)
            .build()?;

        let mut dictionary = BTreeMap::new();
        dictionary.insert("ROBUST_ID".to_owned(), random_hex(18));
        dictionary.insert("SOCKJSID".to_owned(), format!("000/{}", random_hex(8)));

        Ok(Self {
            session_id,
            worker_id,
            iteration,
            base_url,
            http_base,
            ws_base,
            client,
            cookie_jar,
            allowed_tokens: ALLOWED_TOKENS.iter().map(|name| (*name).to_owned()).collect(),
            dictionary,
            web_socket: None,
            receive_queue: None,
            failure: Arc::new(Mutex::new(None)),
            last_event_ended: 0,
            credentials,
            stats,
        })
    }

    /// Replay the recording once, recording per-event timing rows in `log`.
    ///
    /// Failures never propagate: they are written to the log as
    /// `PLAYBACK_FAIL` (or `FAIL` before playback starts), counted in the
    /// shared stats, and the WebSocket is torn down on every exit path.
    pub async fn run(&mut self, start_delay_ms: u64, recording: &Recording, log: &mut SessionLog) {
        if let Err(err) = self.login().await {
            warn!(
                session_id = self.session_id,
                worker_id = self.worker_id,
                "Login failed: {}",
                err
            );
            drop(log.entry("FAIL", 0, &err.to_string()).await);
            self.stats.transition(Transition::Running);
            self.stats.transition(Transition::Failed);
            return;
        }

        if start_delay_ms > 0 {
            drop(log.entry("PLAYBACK_START_INTERVAL_START", 0, "").await);
            tokio::time::sleep(Duration::from_millis(start_delay_ms)).await;
            drop(log.entry("PLAYBACK_START_INTERVAL_END", 0, "").await);
        }

        self.stats.transition(Transition::Running);
        if let Some(first) = recording.events.first() {
            self.last_event_ended = first.created;
        }

        for event in &recording.events {
            if self.fail_if_latched(event, log).await {
                return;
            }

            let sleep_for = sleep_before(
                &event.kind,
                self.web_socket.is_some(),
                self.last_event_ended,
                event.created,
            );
            if sleep_for > 0 {
                drop(
                    log.entry("PLAYBACK_SLEEPBEFORE_START", event.line_number, "")
                        .await,
                );
                tokio::time::sleep(Duration::from_millis(sleep_for)).await;
                drop(
                    log.entry("PLAYBACK_SLEEPBEFORE_END", event.line_number, "")
                        .await,
                );
            }

            if self.fail_if_latched(event, log).await {
                return;
            }

            let name = event.kind.name();
            drop(
                log.entry(&format!("{}_START", name), event.line_number, "")
                    .await,
            );
            match self.handle_event(event).await {
                Ok(()) => {
                    drop(
                        log.entry(&format!("{}_END", name), event.line_number, "")
                            .await,
                    );
                }
                Err(err) => {
                    warn!(
                        session_id = self.session_id,
                        worker_id = self.worker_id,
                        line_number = event.line_number,
                        "Playback failed: {}",
                        err
                    );
                    debug!("Playback failure detail: {:?}", err);
                    drop(
                        log.entry("PLAYBACK_FAIL", event.line_number, &err.to_string())
                            .await,
                    );
                    self.stats.transition(Transition::Failed);
                    self.disconnect().await;
                    return;
                }
            }

            self.last_event_ended = event.created;
        }

        self.stats.transition(Transition::Done);
        drop(log.entry("PLAYBACK_DONE", 0, "").await);
        self.disconnect().await;
    }

    async fn fail_if_latched(&mut self, event: &Event, log: &mut SessionLog) -> bool {
        let Some(message) = self.take_failure() else {
            return false;
        };
        warn!(
            session_id = self.session_id,
            worker_id = self.worker_id,
            line_number = event.line_number,
            "Playback failed: {}",
            message
        );
        drop(
            log.entry("PLAYBACK_FAIL", event.line_number, &message)
                .await,
        );
        self.stats.transition(Transition::Failed);
        self.disconnect().await;
        true
    }

    async fn login(&self) -> AppResult<()> {
        let Some(credentials) = self.credentials.as_ref() else {
            return Ok(());
        };
        if !auth::is_protected(&self.client, &self.base_url).await? {
            return Ok(());
        }
        auth::post_login(&self.client, &self.base_url, credentials, &self.cookie_jar).await
    }

    fn substitute(&self, input: &str) -> AppResult<String> {
        tokens::substitute(input, &self.allowed_tokens, &self.dictionary).map_err(AppError::from)
    }

    fn token_value(&self, name: &str) -> Result<&str, TokenError> {
        self.dictionary
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| TokenError::Missing {
                input: format!("${{{}}}", name),
                names: name.to_owned(),
            })
    }

    fn take_failure(&self) -> Option<String> {
        self.failure.lock().ok().and_then(|mut cell| cell.take())
    }

    #[cfg(test)]
    pub(crate) fn dictionary_value(&self, name: &str) -> Option<&str> {
        self.dictionary.get(name).map(String::as_str)
    }
}

/// Recorded-time pacing for the next event.
///
/// HTTP events only pace once the WebSocket is open (asset fetches before
/// the socket exists replay as fast as possible); sends and the close always
/// preserve the recorded gap. Negative deltas clamp to zero.
pub(crate) fn sleep_before(
    kind: &EventKind,
    ws_open: bool,
    last_event_ended: i64,
    created: i64,
) -> u64 {
    let delta = u64::try_from(created - last_event_ended).unwrap_or(0);
    match kind {
        EventKind::Req(_)
        | EventKind::ReqHome(_)
        | EventKind::ReqSinf(_)
        | EventKind::ReqTok(_)
        | EventKind::ReqPostUpload { .. } => {
            if ws_open {
                delta
            } else {
                0
            }
        }
        EventKind::WsSend { .. } | EventKind::WsClose => delta,
        _ => 0,
    }
}

fn random_hex(length: usize) -> String {
    const HEX: &[u8] = b"0123456789abcdef";
    let mut rng = rand::rng();
    (0..length)
        .map(|_| HEX[rng.random_range(0..HEX.len())] as char)
        .collect()
}
