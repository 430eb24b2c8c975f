//! Response construction and serialization.

use super::reason_phrase;
use serde::Serialize;
use serde_json::json;
use tracing::error;

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_HTML: &str = "text/html";

const NO_CACHE: &str = "no-cache, no-store, must-revalidate";

/// CORS headers attached to every HTTP response.
const CORS_HEADERS: [(&str, &str); 4] = [
    ("Access-Control-Allow-Origin", "*"),
    ("Access-Control-Allow-Methods", "GET, POST, PUT, DELETE, OPTIONS"),
    ("Access-Control-Allow-Headers", "Content-Type, Authorization"),
    ("Access-Control-Max-Age", "86400"),
];

/// A buffered HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Response {
    /// Pretty-printed JSON body with caching disabled.
    pub fn json<T: Serialize + ?Sized>(data: &T, status: u16) -> Self {
        match serde_json::to_vec_pretty(data) {
            Ok(body) => Self {
                status,
                headers: vec![
                    ("Content-Type".to_string(), CONTENT_TYPE_JSON.to_string()),
                    ("Cache-Control".to_string(), NO_CACHE.to_string()),
                ],
                body,
            },
            Err(e) => {
                error!("Failed to serialize response body: {}", e);
                Self::error("Internal server error", 500)
            }
        }
    }

    /// Raw body with an explicit content type, caching disabled.
    pub fn send(data: impl Into<Vec<u8>>, status: u16, content_type: &str) -> Self {
        Self {
            status,
            headers: vec![
                ("Content-Type".to_string(), content_type.to_string()),
                ("Cache-Control".to_string(), NO_CACHE.to_string()),
            ],
            body: data.into(),
        }
    }

    /// `{ "error": true, "message": ... }`
    pub fn error(message: &str, status: u16) -> Self {
        let body = json!({ "error": true, "message": message });
        Self {
            status,
            headers: vec![("Content-Type".to_string(), CONTENT_TYPE_JSON.to_string())],
            body: serde_json::to_vec_pretty(&body).unwrap_or_default(),
        }
    }

    /// No body, e.g. the answer to a CORS preflight.
    pub fn empty(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Serializes the status line, headers and body.
    ///
    /// CORS headers, `Content-Length` and `Connection` are always emitted so
    /// the client can delimit the body on a persistent connection.
    pub fn to_bytes(&self, keep_alive: bool) -> Vec<u8> {
        let mut head = format!(
            "HTTP/1.1 {} {}\r\n",
            self.status,
            reason_phrase(self.status)
        );
        for (name, value) in &self.headers {
            head.push_str(&format!("{name}: {value}\r\n"));
        }
        for (name, value) in CORS_HEADERS {
            head.push_str(&format!("{name}: {value}\r\n"));
        }
        head.push_str(&format!("Content-Length: {}\r\n", self.body.len()));
        head.push_str(if keep_alive {
            "Connection: keep-alive\r\n\r\n"
        } else {
            "Connection: close\r\n\r\n"
        });

        let mut bytes = head.into_bytes();
        bytes.extend_from_slice(&self.body);
        bytes
    }
}
