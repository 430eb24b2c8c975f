//! Request head parsing and the normalized request handed to handlers.

use super::Method;
use crate::error::HttpError;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use tracing::debug;
use url::Url;

/// Upper bound for the request line plus all header lines.
pub const MAX_HEAD_BYTES: usize = 16 * 1024;

/// Parsed request line and headers.
///
/// Header names are stored lowercased; repeated headers are joined with
/// `", "`.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    pub target: String,
    /// Minor version of `HTTP/1.x`
    pub minor_version: u8,
    pub headers: HashMap<String, String>,
}

impl RequestHead {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    fn header_has_token(&self, name: &str, token: &str) -> bool {
        self.header(name).is_some_and(|value| {
            value
                .split(',')
                .any(|part| part.trim().eq_ignore_ascii_case(token))
        })
    }

    /// `Upgrade: websocket` is present.
    pub fn is_websocket_upgrade(&self) -> bool {
        self.header_has_token("upgrade", "websocket")
    }

    /// Whether the connection stays open after the response.
    pub fn keep_alive(&self) -> bool {
        if self.minor_version == 0 {
            self.header_has_token("connection", "keep-alive")
        } else {
            !self.header_has_token("connection", "close")
        }
    }

    /// Splits the request target into its path and query parameters.
    pub fn path_and_query(&self) -> Result<(String, HashMap<String, String>), HttpError> {
        let url = Url::parse("http://localhost/")
            .and_then(|base| base.join(&self.target))
            .map_err(|e| HttpError::MalformedRequestLine(format!("{}: {e}", self.target)))?;
        let query = url.query_pairs().into_owned().collect();
        Ok((url.path().to_string(), query))
    }
}

/// Reads one request head.
///
/// Returns `Ok(None)` when the peer closed the connection cleanly before
/// sending anything, which is how keep-alive connections normally end.
pub async fn read_request_head<R>(
    reader: &mut R,
    max_head_bytes: usize,
) -> Result<Option<RequestHead>, HttpError>
where
    R: AsyncBufRead + Unpin,
{
    let mut consumed = 0usize;

    // Tolerate empty lines before the request line (RFC 9112 §2.2).
    let request_line = loop {
        match read_line(reader, max_head_bytes, &mut consumed).await? {
            None if consumed == 0 => return Ok(None),
            None => return Err(HttpError::UnexpectedEof),
            Some(line) if line.is_empty() => continue,
            Some(line) => break line,
        }
    };

    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(HttpError::MalformedRequestLine(request_line));
    };

    let minor_version = match version {
        "HTTP/1.1" => 1,
        "HTTP/1.0" => 0,
        _ => return Err(HttpError::MalformedRequestLine(request_line)),
    };

    let mut head = RequestHead {
        method: Method::parse(method),
        target: target.to_string(),
        minor_version,
        headers: HashMap::new(),
    };

    loop {
        let line = read_line(reader, max_head_bytes, &mut consumed)
            .await?
            .ok_or(HttpError::UnexpectedEof)?;
        if line.is_empty() {
            break;
        }

        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| HttpError::MalformedHeader(line.clone()))?;
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(HttpError::MalformedHeader(line.clone()));
        }

        let name = name.to_ascii_lowercase();
        let value = value.trim().to_string();
        head.headers
            .entry(name)
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }

    debug!("{} {}", head.method, head.target);
    Ok(Some(head))
}

/// Reads a CRLF (or bare LF) terminated line, charging its length against
/// the head budget. `Ok(None)` on EOF before any byte of the line.
async fn read_line<R>(
    reader: &mut R,
    max_head_bytes: usize,
    consumed: &mut usize,
) -> Result<Option<String>, HttpError>
where
    R: AsyncBufRead + Unpin,
{
    let remaining = max_head_bytes.saturating_sub(*consumed);
    if remaining == 0 {
        return Err(HttpError::HeadTooLarge(max_head_bytes));
    }

    let mut buf = Vec::new();
    let n = (&mut *reader)
        .take(remaining as u64)
        .read_until(b'\n', &mut buf)
        .await?;
    *consumed += n;

    if n == 0 {
        return Ok(None);
    }
    if buf.last() != Some(&b'\n') {
        if n == remaining {
            return Err(HttpError::HeadTooLarge(max_head_bytes));
        }
        return Err(HttpError::UnexpectedEof);
    }

    buf.pop();
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
    String::from_utf8(buf)
        .map(Some)
        .map_err(|e| HttpError::MalformedHeader(String::from_utf8_lossy(e.as_bytes()).into_owned()))
}

/// Reads the complete request body described by `head`.
pub async fn read_body<R>(
    reader: &mut R,
    head: &RequestHead,
    max_body_bytes: usize,
) -> Result<Vec<u8>, HttpError>
where
    R: AsyncBufRead + Unpin,
{
    if head.header_has_token("transfer-encoding", "chunked") {
        return read_chunked_body(reader, max_body_bytes).await;
    }

    let Some(length) = head.header("content-length") else {
        return Ok(Vec::new());
    };
    let length: usize = length
        .parse()
        .map_err(|_| HttpError::InvalidContentLength(length.to_string()))?;
    if length > max_body_bytes {
        return Err(HttpError::BodyTooLarge {
            size: length,
            limit: max_body_bytes,
        });
    }

    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            HttpError::UnexpectedEof
        } else {
            HttpError::Io(e)
        }
    })?;
    Ok(body)
}

async fn read_chunked_body<R>(reader: &mut R, max_body_bytes: usize) -> Result<Vec<u8>, HttpError>
where
    R: AsyncBufRead + Unpin,
{
    let mut body = Vec::new();
    let mut consumed = 0usize;

    loop {
        let size_line = read_line(reader, MAX_HEAD_BYTES, &mut consumed)
            .await?
            .ok_or(HttpError::UnexpectedEof)?;
        let size_hex = size_line.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size_hex, 16)
            .map_err(|_| HttpError::InvalidContentLength(size_line.clone()))?;

        if size == 0 {
            // Trailer section, terminated by an empty line.
            loop {
                let trailer = read_line(reader, MAX_HEAD_BYTES, &mut consumed)
                    .await?
                    .ok_or(HttpError::UnexpectedEof)?;
                if trailer.is_empty() {
                    return Ok(body);
                }
            }
        }

        if body.len() + size > max_body_bytes {
            return Err(HttpError::BodyTooLarge {
                size: body.len() + size,
                limit: max_body_bytes,
            });
        }

        let start = body.len();
        body.resize(start + size, 0);
        reader.read_exact(&mut body[start..]).await?;

        let mut crlf = [0u8; 2];
        reader.read_exact(&mut crlf).await?;
        if &crlf != b"\r\n" {
            return Err(HttpError::InvalidContentLength(size_line));
        }
        consumed = 0;
    }
}

/// Parses a request body as JSON. Empty or unparsable bodies become an
/// empty object so handlers can treat the body as validated-or-empty.
pub fn parse_json_body(body: &[u8]) -> Value {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Value::Object(Map::new());
    }
    serde_json::from_slice(body).unwrap_or_else(|e| {
        debug!("Ignoring unparsable JSON body: {}", e);
        Value::Object(Map::new())
    })
}

/// The request object handed to HTTP handlers.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    /// Path component of the request target
    pub url: String,
    pub query: HashMap<String, String>,
    /// Values bound to `:name` segments of the matched route
    pub params: HashMap<String, String>,
    pub body: Value,
    pub headers: HashMap<String, String>,
    pub remote_addr: SocketAddr,
}

impl Request {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Query parameter by name; empty values count as absent.
    pub fn query(&self, name: &str) -> Option<&str> {
        self.query
            .get(name)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}
