//! Tracking of open WebSocket clients.
//!
//! Each client is represented by a [`ClientHandle`] holding its bounded
//! outbound queue. The [`ConnectionManager`] owns the active set and fans
//! broadcasts out over those queues without ever blocking on a socket.

pub mod client;
pub mod manager;

pub use client::{ClientHandle, ConnectionState};
pub use manager::ConnectionManager;

use std::fmt;
use uuid::Uuid;

/// Unique identifier of a WebSocket client for the lifetime of its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
