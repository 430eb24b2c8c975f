//! Core realtime server implementation.
//!
//! This module contains the `RealtimeServer` struct: it owns the shared
//! [`ServerContext`], binds the listening socket and runs the accept loop
//! until a shutdown is requested.

use super::handlers::handle_connection;
use super::ServerContext;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::store::{JsonFileBackend, StorageBackend};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::TcpListener as StdTcpListener;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Semaphore};
use tracing::{debug, error, info, warn};

/// Listen backlog passed to `listen(2)`.
const LISTEN_BACKLOG: i32 = 1024;

/// The realtime data-sync server.
///
/// One instance serves HTTP and WebSocket clients on a single port, backed
/// by one store. Instances share nothing, so tests can run several in the
/// same process.
///
/// # Lifecycle
///
/// 1. [`RealtimeServer::new`] loads the data file (creating it if needed)
/// 2. [`RealtimeServer::start`] binds and serves until shutdown
/// 3. [`RealtimeServer::shutdown`] stops accepting, closes WebSocket clients
///    with `1001` and saves the store one last time
#[derive(Debug)]
pub struct RealtimeServer {
    context: Arc<ServerContext>,
    shutdown_sender: broadcast::Sender<()>,
    connection_limit: Arc<Semaphore>,
}

impl RealtimeServer {
    /// Creates a server persisting to `config.data_file`.
    pub async fn new(config: ServerConfig) -> Result<Self, ServerError> {
        let backend = Arc::new(JsonFileBackend::new(config.data_file.clone()));
        Self::with_backend(config, backend).await
    }

    /// Creates a server with a custom storage backend.
    pub async fn with_backend(
        config: ServerConfig,
        backend: Arc<dyn StorageBackend>,
    ) -> Result<Self, ServerError> {
        let (shutdown_sender, _) = broadcast::channel(1);
        let connection_limit = Arc::new(Semaphore::new(config.max_connections.max(1)));
        let context = Arc::new(ServerContext::new(config, backend).await?);

        Ok(Self {
            context,
            shutdown_sender,
            connection_limit,
        })
    }

    pub fn context(&self) -> Arc<ServerContext> {
        self.context.clone()
    }

    /// Binds the configured address.
    ///
    /// This is the only failure that stops the server from running.
    pub fn bind(&self) -> Result<TcpListener, ServerError> {
        let address = self.context.config.bind_address;

        let socket = Socket::new(Domain::for_address(address), Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| ServerError::Network(format!("Socket creation failed: {e}")))?;
        socket.set_reuse_address(true).ok();

        socket
            .bind(&address.into())
            .map_err(|e| ServerError::Network(format!("Bind failed on {address}: {e}")))?;
        socket
            .listen(LISTEN_BACKLOG)
            .map_err(|e| ServerError::Network(format!("Listen failed: {e}")))?;

        let std_listener: StdTcpListener = socket.into();
        std_listener
            .set_nonblocking(true)
            .map_err(|e| ServerError::Network(format!("Failed to set non-blocking: {e}")))?;

        TcpListener::from_std(std_listener)
            .map_err(|e| ServerError::Network(format!("Tokio listener creation failed: {e}")))
    }

    /// Binds and serves until [`RealtimeServer::shutdown`] is called.
    pub async fn start(&self) -> Result<(), ServerError> {
        let listener = self.bind()?;
        self.serve(listener).await
    }

    /// Runs the accept loop on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        let local_addr = listener.local_addr()?;
        let config = &self.context.config;
        info!("🚀 RealTime server listening on http://{}", local_addr);
        info!("🔌 WebSocket endpoint: ws://{}{}", local_addr, config.websocket_path);
        info!("💾 Data file: {}", config.data_file.display());

        let mut shutdown_receiver = self.shutdown_sender.subscribe();

        loop {
            let (stream, addr) = tokio::select! {
                _ = shutdown_receiver.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        continue;
                    }
                },
            };

            let Ok(permit) = self.connection_limit.clone().try_acquire_owned() else {
                warn!("Connection limit reached, dropping connection from {}", addr);
                continue;
            };

            debug!("Accepted connection from {}", addr);
            let context = self.context.clone();
            let shutdown = self.shutdown_sender.subscribe();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, addr, context, shutdown).await {
                    debug!("Connection {} ended with error: {}", addr, e);
                }
                drop(permit);
            });
        }

        info!("Server stopped accepting connections");
        Ok(())
    }

    /// Stops the accept loop, closes every WebSocket session and saves the
    /// store.
    pub async fn shutdown(&self) -> Result<(), ServerError> {
        info!("🛑 Shutting down server...");
        let _ = self.shutdown_sender.send(());

        self.context.save().await?;
        info!("✅ Data saved");
        Ok(())
    }
}
