//! Message envelope exchanged over the WebSocket endpoint.
//!
//! Every server push uses the same wrapper:
//!
//! ```json
//! {
//!   "type": "DATA_UPDATED",
//!   "data": { "key": "score", "value": 42, "operation": "set" },
//!   "timestamp": 1718000000000
//! }
//! ```
//!
//! Clients send `{ "type": ..., "data": ... }`; the timestamp is optional
//! inbound and ignored.

use crate::utils::current_timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;

/// Message type names used on the wire.
pub mod message_types {
    pub const WELCOME: &str = "WELCOME";
    pub const DATA_UPDATED: &str = "DATA_UPDATED";
    pub const PING: &str = "PING";
    pub const PONG: &str = "PONG";
    pub const SUBSCRIBE: &str = "SUBSCRIBE";
    pub const SUBSCRIBED: &str = "SUBSCRIBED";
    pub const ECHO: &str = "ECHO";
}

/// `{ type, data, timestamp }` wrapper for every outbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message type, e.g. `WELCOME` or `DATA_UPDATED`
    #[serde(rename = "type")]
    pub kind: String,

    /// Type-specific payload
    #[serde(default)]
    pub data: Value,

    /// Milliseconds since the Unix epoch at construction time
    #[serde(default)]
    pub timestamp: u64,
}

impl Envelope {
    /// Creates an envelope stamped with the current time.
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
            timestamp: current_timestamp(),
        }
    }

    /// Serializes to the compact JSON text sent in a frame.
    pub fn to_json(&self) -> String {
        // Serializing a String/Value/u64 struct cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// The envelope as a WebSocket text message. Cloning the message shares
    /// the encoded text.
    pub fn to_message(&self) -> Message {
        Message::text(self.to_json())
    }
}
