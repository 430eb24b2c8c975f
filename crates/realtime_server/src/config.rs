//! Server configuration types and defaults.
//!
//! This module contains the server configuration structure and default values
//! used to initialize and customize the realtime server behavior.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// What to do with a client whose outbound queue is full when a broadcast
/// arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Discard the message for that client only; the connection stays up.
    Drop,
    /// Mark the client closed and wake its session so it terminates.
    #[default]
    Disconnect,
}

/// Configuration structure for the realtime server.
///
/// Contains all necessary parameters to configure server behavior including
/// network settings, the data file location, connection limits and the
/// WebSocket hardening knobs.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// The socket address to bind the server to
    pub bind_address: SocketAddr,

    /// JSON file the store is mirrored to
    pub data_file: PathBuf,

    /// Path that accepts WebSocket upgrades
    pub websocket_path: String,

    /// Maximum number of concurrent TCP connections (HTTP and WebSocket)
    pub max_connections: usize,

    /// Read timeout for a request and idle timeout for keep-alive, in seconds
    pub connection_timeout: u64,

    /// Largest accepted HTTP request body
    pub max_body_bytes: usize,

    /// Largest accepted inbound WebSocket message (after reassembly)
    pub max_frame_bytes: usize,

    /// Capacity of each client's outbound message queue
    pub outbound_queue_capacity: usize,

    /// Behaviour when a client's outbound queue is full
    pub overflow_policy: OverflowPolicy,
}

impl ServerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], 3000)),
            data_file: PathBuf::from("site_data.json"),
            websocket_path: "/ws".to_string(),
            max_connections: 1000,
            connection_timeout: 60,
            max_body_bytes: 1024 * 1024,
            max_frame_bytes: 1024 * 1024,
            outbound_queue_capacity: 256,
            overflow_policy: OverflowPolicy::Disconnect,
        }
    }
}
