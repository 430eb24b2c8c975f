//! Dispatch of messages received from a WebSocket client.

use super::types::{message_types, Envelope};
use serde_json::{json, Value};
use tracing::{debug, warn};

/// Computes the reply to one text message from a client.
///
/// Replies go to the sending client only; nothing here broadcasts.
///
/// # Arguments
///
/// * `text` - The decoded text payload, expected to be a JSON object
///   `{ "type": ..., "data": ... }`
///
/// # Returns
///
/// The envelope to send back, or `None` when the payload is not JSON. A
/// malformed message is logged and ignored, the connection stays open.
///
/// # Message Types
///
/// * `PING` - answered with `PONG`
/// * `SUBSCRIBE` - answered with `SUBSCRIBED`, echoing `data.channels`
///   (an empty list when absent)
/// * anything else, including a missing `type` - answered with `ECHO`
///   carrying the whole received message
pub fn handle_client_message(text: &str) -> Option<Envelope> {
    let message: Value = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            warn!("Ignoring malformed client message: {}", e);
            return None;
        }
    };

    let kind = message.get("type").and_then(Value::as_str);
    debug!("📨 Client message of type {:?}", kind);

    let reply = match kind {
        Some(message_types::PING) => Envelope::new(message_types::PONG, Value::Null),
        Some(message_types::SUBSCRIBE) => {
            let channels = message
                .get("data")
                .and_then(|data| data.get("channels"))
                .filter(|channels| !channels.is_null())
                .cloned()
                .unwrap_or_else(|| json!([]));
            Envelope::new(message_types::SUBSCRIBED, json!({ "channels": channels }))
        }
        _ => Envelope::new(message_types::ECHO, message),
    };
    Some(reply)
}
