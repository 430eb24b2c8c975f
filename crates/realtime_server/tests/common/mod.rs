//! Shared helpers for the integration tests: a server on an ephemeral port,
//! a raw HTTP client and a WebSocket client.

#![allow(dead_code)]

use futures::StreamExt;
use realtime_server::{RealtimeServer, ServerConfig};
use serde_json::Value;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TestServer {
    pub server: Arc<RealtimeServer>,
    pub addr: SocketAddr,
    pub data_file: PathBuf,
    task: JoinHandle<()>,
    // Keeps the data directory alive for the duration of the test.
    _dir: Option<TempDir>,
}

impl TestServer {
    pub async fn start() -> Self {
        let dir = TempDir::new().unwrap();
        let data_file = dir.path().join("site_data.json");
        let mut server = Self::start_on(data_file, |_| {}).await;
        server._dir = Some(dir);
        server
    }

    pub async fn start_with(configure: impl FnOnce(&mut ServerConfig)) -> Self {
        let dir = TempDir::new().unwrap();
        let data_file = dir.path().join("site_data.json");
        let mut server = Self::start_on(data_file, configure).await;
        server._dir = Some(dir);
        server
    }

    /// Starts a server on an existing data file, e.g. to simulate a restart.
    pub async fn start_on(data_file: PathBuf, configure: impl FnOnce(&mut ServerConfig)) -> Self {
        let mut config = ServerConfig {
            bind_address: "127.0.0.1:0".parse().unwrap(),
            data_file: data_file.clone(),
            ..ServerConfig::default()
        };
        configure(&mut config);

        let server = Arc::new(RealtimeServer::new(config).await.unwrap());
        let listener = server.bind().unwrap();
        let addr = listener.local_addr().unwrap();

        let serving = server.clone();
        let task = tokio::spawn(async move {
            serving.serve(listener).await.unwrap();
        });

        Self {
            server,
            addr,
            data_file,
            task,
            _dir: None,
        }
    }

    /// Shuts down and waits for the accept loop to exit. Returns the data
    /// directory so a follow-up server can reuse the file.
    pub async fn stop(mut self) -> Option<TempDir> {
        self.server.shutdown().await.unwrap();
        tokio::time::timeout(RECV_TIMEOUT, &mut self.task)
            .await
            .unwrap()
            .unwrap();
        self._dir.take()
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub fn data_on_disk(&self) -> Value {
        let contents = std::fs::read_to_string(&self.data_file).unwrap();
        serde_json::from_str(&contents).unwrap()
    }
}

pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

pub fn raw_request(method: &str, path: &str, body: Option<&Value>, connection: &str) -> Vec<u8> {
    let body = body.map(|b| serde_json::to_vec(b).unwrap()).unwrap_or_default();
    let mut request = format!(
        "{method} {path} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: {connection}\r\n\r\n",
        body.len()
    )
    .into_bytes();
    request.extend_from_slice(&body);
    request
}

/// Reads one `Content-Length` delimited response.
pub async fn read_response<R>(reader: &mut BufReader<R>) -> HttpResponse
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut status_line = String::new();
    reader.read_line(&mut status_line).await.unwrap();
    let status = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(|| panic!("bad status line: {status_line:?}"));

    let mut headers = Vec::new();
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        let (name, value) = line.split_once(':').unwrap();
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }

    let length: usize = headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case("content-length"))
        .map(|(_, v)| v.parse().unwrap())
        .unwrap_or(0);
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await.unwrap();

    HttpResponse {
        status,
        headers,
        body,
    }
}

/// One request on a fresh connection with `Connection: close`.
pub async fn http(addr: SocketAddr, method: &str, path: &str, body: Option<Value>) -> HttpResponse {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(&raw_request(method, path, body.as_ref(), "close"))
        .await
        .unwrap();
    let mut reader = BufReader::new(stream);
    tokio::time::timeout(RECV_TIMEOUT, read_response(&mut reader))
        .await
        .unwrap()
}

pub async fn ws_connect(server: &TestServer) -> WsClient {
    let (ws, _) = connect_async(server.ws_url()).await.unwrap();
    ws
}

/// Next text message parsed as JSON, skipping control frames.
pub async fn next_json(ws: &mut WsClient) -> Value {
    loop {
        let message = tokio::time::timeout(RECV_TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for a message")
            .expect("stream ended")
            .unwrap();
        if let Message::Text(text) = message {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

/// Connects and consumes the `WELCOME` message.
pub async fn ws_connect_ready(server: &TestServer) -> WsClient {
    let mut ws = ws_connect(server).await;
    let welcome = next_json(&mut ws).await;
    assert_eq!(welcome["type"], "WELCOME");
    ws
}

/// Asserts nothing arrives within a short window.
pub async fn assert_silent(ws: &mut WsClient) {
    let result = tokio::time::timeout(Duration::from_millis(300), ws.next()).await;
    assert!(result.is_err(), "unexpected message: {result:?}");
}
