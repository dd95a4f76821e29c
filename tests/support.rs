use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

/// One canned HTTP response; a path's responses are served in order with the
/// last one repeating.
#[derive(Clone, Debug)]
pub struct ScriptedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
    pub delay_ms: u64,
}

impl ScriptedResponse {
    pub fn ok(body: &str) -> Self {
        Self {
            status: 200,
            headers: vec![],
            body: body.to_owned(),
            delay_ms: 0,
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            headers: vec![],
            body: String::new(),
            delay_ms: 0,
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_owned(), value.to_owned()));
        self
    }

    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }
}

/// Scripted behavior for a fixture Shiny app: canned HTTP responses by path
/// and WebSocket frames pushed as soon as a client connects.
#[derive(Clone, Debug, Default)]
pub struct AppScript {
    routes: HashMap<String, Vec<ScriptedResponse>>,
    pub ws_greeting: Vec<String>,
}

impl AppScript {
    pub fn route(&mut self, path: &str, response: ScriptedResponse) -> &mut Self {
        self.routes.entry(path.to_owned()).or_default().push(response);
        self
    }

    pub fn greet(&mut self, frame: &str) -> &mut Self {
        self.ws_greeting.push(frame.to_owned());
        self
    }
}

pub struct ServerHandle {
    task: JoinHandle<()>,
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[derive(Default)]
struct ServerState {
    hits: Mutex<HashMap<String, usize>>,
}

/// Spawn a fixture app speaking plain HTTP and WebSocket on one listener.
///
/// # Errors
///
/// Returns an error if the listener cannot be created.
pub async fn spawn_app_server(script: AppScript) -> Result<(String, ServerHandle), String> {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .map_err(|err| format!("bind test server failed: {}", err))?;
    let addr = listener
        .local_addr()
        .map_err(|err| format!("server addr failed: {}", err))?;

    let script = Arc::new(script);
    let state = Arc::new(ServerState::default());
    let task = tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let script = Arc::clone(&script);
            let state = Arc::clone(&state);
            tokio::spawn(handle_connection(stream, script, state));
        }
    });

    Ok((format!("http://{}", addr), ServerHandle { task }))
}

async fn handle_connection(stream: TcpStream, script: Arc<AppScript>, state: Arc<ServerState>) {
    // Sniff the request head without consuming it so the WebSocket handshake
    // can still read it.
    let mut buffer = [0u8; 4096];
    let mut sniffed = 0usize;
    for _ in 0..200 {
        match stream.peek(&mut buffer).await {
            Ok(length) => {
                sniffed = length;
                if head_complete(&buffer[..length]) {
                    break;
                }
            }
            Err(_) => return,
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let head = String::from_utf8_lossy(&buffer[..sniffed]).to_ascii_lowercase();
    if head.contains("upgrade: websocket") {
        serve_websocket(stream, script).await;
    } else {
        serve_http(stream, script, state).await;
    }
}

fn head_complete(bytes: &[u8]) -> bool {
    bytes.windows(4).any(|window| window == b"\r\n\r\n")
}

async fn serve_http(mut stream: TcpStream, script: Arc<AppScript>, state: Arc<ServerState>) {
    let mut request = Vec::new();
    let mut chunk = [0u8; 4096];
    while !head_complete(&request) {
        let Ok(length) = stream.read(&mut chunk).await else {
            return;
        };
        if length == 0 {
            return;
        }
        request.extend_from_slice(&chunk[..length]);
    }

    let head_text = String::from_utf8_lossy(&request).to_string();
    let path = head_text
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("/")
        .to_owned();

    // Drain any request body so the client is not cut off mid-send.
    if let Some(content_length) = content_length(&head_text) {
        let header_end = request
            .windows(4)
            .position(|window| window == b"\r\n\r\n")
            .map_or(request.len(), |position| position + 4);
        let mut remaining = content_length.saturating_sub(request.len() - header_end);
        while remaining > 0 {
            let Ok(length) = stream.read(&mut chunk).await else {
                break;
            };
            if length == 0 {
                break;
            }
            remaining = remaining.saturating_sub(length);
        }
    }

    let response = pick_response(&script, &state, &path);
    if response.delay_ms > 0 {
        tokio::time::sleep(Duration::from_millis(response.delay_ms)).await;
    }

    let mut text = format!(
        "HTTP/1.1 {} Fixture\r\nContent-Length: {}\r\nConnection: close\r\n",
        response.status,
        response.body.len()
    );
    for (name, value) in &response.headers {
        text.push_str(&format!("{}: {}\r\n", name, value));
    }
    text.push_str("\r\n");
    text.push_str(&response.body);

    drop(stream.write_all(text.as_bytes()).await);
    drop(stream.flush().await);
}

fn content_length(head: &str) -> Option<usize> {
    head.lines()
        .find(|line| line.to_ascii_lowercase().starts_with("content-length:"))
        .and_then(|line| line.split(':').nth(1))
        .and_then(|value| value.trim().parse().ok())
}

fn pick_response(script: &AppScript, state: &ServerState, path: &str) -> ScriptedResponse {
    let bare_path = path.split('?').next().unwrap_or(path);
    let responses = script
        .routes
        .get(path)
        .or_else(|| script.routes.get(bare_path));
    let Some(responses) = responses else {
        return ScriptedResponse::status(404);
    };

    let index = {
        let mut hits = state.hits.lock().unwrap();
        let counter = hits.entry(path.to_owned()).or_insert(0);
        let index = (*counter).min(responses.len().saturating_sub(1));
        *counter += 1;
        index
    };
    responses[index].clone()
}

async fn serve_websocket(stream: TcpStream, script: Arc<AppScript>) {
    let Ok(web_socket) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    let (mut sink, mut source) = web_socket.split();

    for frame in &script.ws_greeting {
        if sink.send(Message::Text(frame.clone())).await.is_err() {
            return;
        }
    }

    while let Some(next) = source.next().await {
        match next {
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }
}

/// ISO-8601 timestamp `offset_ms` past a fixed base instant.
pub fn created(offset_ms: i64) -> String {
    let base = chrono::DateTime::parse_from_rfc3339("2020-01-01T00:00:00Z")
        .expect("valid base timestamp");
    (base + chrono::Duration::milliseconds(offset_ms))
        .to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Write recording lines to a temp file that lives as long as the handle.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn write_recording(lines: &[serde_json::Value]) -> Result<tempfile::NamedTempFile, String> {
    let mut file =
        tempfile::NamedTempFile::new().map_err(|err| format!("tempfile failed: {}", err))?;
    for line in lines {
        writeln!(file, "{}", line).map_err(|err| format!("write recording failed: {}", err))?;
    }
    file.flush()
        .map_err(|err| format!("flush recording failed: {}", err))?;
    Ok(file)
}

/// Event-name column of every row in a session CSV, in order.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn read_events(path: &Path) -> Result<Vec<String>, String> {
    let text =
        std::fs::read_to_string(path).map_err(|err| format!("read session csv failed: {}", err))?;
    Ok(text
        .lines()
        .filter(|line| !line.starts_with('#') && !line.starts_with("session_id"))
        .filter_map(|line| line.split(',').nth(3).map(str::to_owned))
        .collect())
}

/// Full rows (split on commas) of a session CSV, header and comments skipped.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn read_rows(path: &Path) -> Result<Vec<Vec<String>>, String> {
    let text =
        std::fs::read_to_string(path).map_err(|err| format!("read session csv failed: {}", err))?;
    Ok(text
        .lines()
        .filter(|line| !line.starts_with('#') && !line.starts_with("session_id"))
        .map(|line| line.split(',').map(str::to_owned).collect())
        .collect())
}
