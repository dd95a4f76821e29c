//! WebSocket open/close and the receive pipeline.
//!
//! The socket's read half lives on its own task. Every inbound text frame is
//! classified by the message filter; ignorable frames are dropped there, so
//! the bounded queue only ever holds frames a scripted `WS_RECV` can consume.
//! The producer never blocks: a full queue means the server is outrunning
//! the recorded cadence and the session is failed. Reader-side failures are
//! latched and a sentinel is offered so a blocked consumer wakes.

use std::sync::{Arc, Mutex};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use reqwest::cookie::CookieStore;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::error::{AppError, AppResult, SessionError};
use crate::filter;

use super::{Session, RECEIVE_QUEUE_CAPACITY};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

pub(super) struct WsHandle {
    sink: WsSink,
    reader: JoinHandle<()>,
}

#[derive(Debug)]
pub(super) enum QueueItem {
    Frame(String),
    Failure(String),
}

impl Session {
    pub(super) async fn open_web_socket(&mut self, url: &str) -> AppResult<()> {
        if self.web_socket.is_some() {
            return Err(AppError::session(SessionError::WebSocketAlreadyOpen));
        }

        let path = self.substitute(url)?;
        let target = format!("{}{}", self.ws_base, path);
        debug!(session_id = self.session_id, "WS open {}", target);

        let mut request = target.as_str().into_client_request()?;
        if let Some(cookies) = self.cookie_jar.cookies(&self.base_url) {
            if let Ok(value) = cookies.to_str() {
                if let Ok(cookie_header) = HeaderValue::from_str(value) {
                    request.headers_mut().insert(header::COOKIE, cookie_header);
                }
            }
        }

        let (stream, _response) = connect_async(request).await?;
        let (sink, source) = stream.split();
        let (queue_tx, queue_rx) = mpsc::channel(RECEIVE_QUEUE_CAPACITY);
        let reader = tokio::spawn(read_frames(source, queue_tx, Arc::clone(&self.failure)));

        self.web_socket = Some(WsHandle { sink, reader });
        self.receive_queue = Some(queue_rx);
        Ok(())
    }

    /// Substitute tokens into a recorded frame and send it as text.
    pub(super) async fn send_frame(&mut self, message: &str) -> AppResult<()> {
        let text = self.substitute(message)?;
        let handle = self
            .web_socket
            .as_mut()
            .ok_or_else(|| AppError::session(SessionError::WebSocketNotOpen))?;
        debug!(session_id = self.session_id, "WS send {}", text);
        handle.sink.send(Message::Text(text)).await?;
        Ok(())
    }

    /// Wait for the next non-ignorable frame.
    pub(super) async fn take_frame(&mut self) -> AppResult<String> {
        let item = match self.receive_queue.as_mut() {
            Some(queue) => queue.recv().await,
            None => return Err(AppError::session(SessionError::WebSocketNotOpen)),
        };
        match item {
            Some(QueueItem::Frame(text)) => {
                debug!(session_id = self.session_id, "WS recv {}", text);
                Ok(text)
            }
            Some(QueueItem::Failure(message)) => {
                Err(AppError::session(SessionError::Failed { message }))
            }
            None => {
                let error = match self.take_failure() {
                    Some(message) => SessionError::Failed { message },
                    None => SessionError::ReceiveQueueClosed,
                };
                Err(AppError::session(error))
            }
        }
    }

    pub(super) async fn close_web_socket(&mut self) -> AppResult<()> {
        let mut handle = self
            .web_socket
            .take()
            .ok_or_else(|| AppError::session(SessionError::WebSocketNotOpen))?;
        self.receive_queue = None;
        debug!(session_id = self.session_id, "WS close");
        drop(handle.sink.close().await);
        handle.reader.abort();
        Ok(())
    }

    /// Tear the socket down on any exit path; a no-op when nothing is open.
    pub(super) async fn disconnect(&mut self) {
        if self.web_socket.is_some() {
            drop(self.close_web_socket().await);
        }
        self.receive_queue = None;
    }
}

async fn read_frames(
    mut source: WsSource,
    queue: mpsc::Sender<QueueItem>,
    failure: Arc<Mutex<Option<String>>>,
) {
    while let Some(next) = source.next().await {
        match next {
            Ok(Message::Text(text)) => match filter::can_ignore(&text) {
                Ok(true) => debug!("Ignoring message: {}", text),
                Ok(false) => match queue.try_send(QueueItem::Frame(text)) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        fail(
                            &queue,
                            &failure,
                            SessionError::ReceiveQueueOverflow.to_string(),
                        );
                        break;
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => break,
                },
                Err(err) => {
                    fail(&queue, &failure, err.to_string());
                    break;
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(err) => {
                fail(&queue, &failure, format!("WebSocket read failed: {}", err));
                break;
            }
        }
    }
}

fn fail(queue: &mpsc::Sender<QueueItem>, failure: &Arc<Mutex<Option<String>>>, message: String) {
    if let Ok(mut cell) = failure.lock() {
        if cell.is_none() {
            *cell = Some(message.clone());
        }
    }
    // Best effort: a full queue still wakes the consumer when the sender
    // drops at task exit.
    drop(queue.try_send(QueueItem::Failure(message)));
}
