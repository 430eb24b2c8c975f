//! Message envelopes and the handling of client-sent WebSocket messages.

pub mod router;
pub mod types;

pub use router::handle_client_message;
pub use types::{message_types, Envelope};
