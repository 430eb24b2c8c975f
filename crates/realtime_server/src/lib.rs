//! # Realtime Server
//!
//! A small real-time data-sync server. Clients read and write a JSON
//! key-value document over a CRUD HTTP API; every successful write is
//! persisted to a single JSON file and pushed to all connected WebSocket
//! clients as a `DATA_UPDATED` envelope.
//!
//! The HTTP layer, route table and WebSocket upgrade are implemented here
//! directly on top of tokio sockets; the upgraded socket is handed to
//! `tokio-tungstenite` for framing.
//!
//! ## Endpoints
//!
//! * `GET /api/data`, `GET /api/data/:key[?field=]`
//! * `POST /api/data` with `{ "key": ..., "value": ... }`
//! * `PUT /api/data/:key`, `DELETE /api/data/:key[?field=|?id=]`
//! * `GET /status`
//! * `GET /ws` upgraded to a WebSocket
//!
//! ## Example
//!
//! ```no_run
//! use realtime_server::{RealtimeServer, ServerConfig};
//!
//! # async fn run() -> Result<(), realtime_server::ServerError> {
//! let server = RealtimeServer::new(ServerConfig::default()).await?;
//! server.start().await?;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod config;
pub mod connection;
pub mod error;
pub mod http;
pub mod messaging;
pub mod server;
pub mod store;
pub mod utils;
pub mod websocket;

pub use config::{OverflowPolicy, ServerConfig};
pub use error::{ApiError, HttpError, RouteError, ServerError, StorageError, StoreError};
pub use messaging::Envelope;
pub use server::{RealtimeServer, ServerContext};
pub use store::{JsonFileBackend, StorageBackend, Store};
