//! WebSocket server side: the upgrade handshake, a filter for undecodable
//! text frames and the per-client session loop. Framing itself is done by
//! `tokio-tungstenite`.

pub mod handshake;
pub mod session;
pub mod text_filter;

pub use handshake::{accept_key, client_key, handshake_response, WS_GUID};
pub use session::run_session;
pub use text_filter::TextFrameFilter;
