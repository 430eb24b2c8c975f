//! Server lifecycle: the accept loop, per-connection handling and the shared
//! context handed to every handler.

pub mod context;
pub mod core;
mod handlers;

pub use context::ServerContext;
pub use self::core::RealtimeServer;
