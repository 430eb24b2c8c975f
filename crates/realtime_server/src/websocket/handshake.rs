//! Opening handshake (RFC 6455 §4.2).

use crate::http::RequestHead;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use sha1::{Digest, Sha1};

/// Fixed GUID appended to the client key before hashing.
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Derives `Sec-WebSocket-Accept` from the client's `Sec-WebSocket-Key`.
pub fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.trim().as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Returns the client key of a usable upgrade request.
///
/// A missing or empty `Sec-WebSocket-Key` makes the request unusable and the
/// socket is dropped without a response.
pub fn client_key(head: &RequestHead) -> Option<&str> {
    head.header("sec-websocket-key")
        .map(str::trim)
        .filter(|key| !key.is_empty())
}

/// The `101 Switching Protocols` response completing the upgrade.
pub fn handshake_response(client_key: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\
         \r\n",
        accept_key(client_key)
    )
}
