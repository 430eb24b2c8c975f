//! State shared by every connection of one server instance.

use crate::api::{build_router, Handler};
use crate::config::ServerConfig;
use crate::connection::ConnectionManager;
use crate::error::{ApiError, ServerError, StorageResult};
use crate::http::{request::parse_json_body, Method, Request, RequestHead, Response, Router};
use crate::store::{load_or_initialize, Store, StorageBackend};
use futures::FutureExt;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

/// The store, the client set and the route table of one server.
///
/// Handlers receive it as `Arc<ServerContext>`; nothing lives in globals, so
/// several servers can run side by side in one process.
pub struct ServerContext {
    pub config: ServerConfig,
    /// Held across mutate, save and broadcast by mutating handlers
    pub store: Mutex<Store>,
    pub backend: Arc<dyn StorageBackend>,
    pub connections: ConnectionManager,
    router: Router<Handler>,
    started_at: Instant,
}

impl std::fmt::Debug for ServerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerContext")
            .field("config", &self.config)
            .field("backend", &self.backend)
            .field("connections", &self.connections)
            .finish_non_exhaustive()
    }
}

impl ServerContext {
    /// Loads (or initialises) the store through `backend` and builds the
    /// route table.
    pub async fn new(
        config: ServerConfig,
        backend: Arc<dyn StorageBackend>,
    ) -> Result<Self, ServerError> {
        let router = build_router(&config.websocket_path)?;
        let store = load_or_initialize(backend.as_ref()).await;

        Ok(Self {
            connections: ConnectionManager::new(config.overflow_policy),
            config,
            store: Mutex::new(store),
            backend,
            router,
            started_at: Instant::now(),
        })
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Writes the current store to the backend.
    pub async fn save(&self) -> StorageResult<()> {
        let mut store = self.store.lock().await;
        store.touch();
        self.backend.save(&store).await
    }

    /// Runs the handler for a fully read request.
    ///
    /// `OPTIONS` is answered before routing. Unknown routes get 404, handler
    /// errors are rendered with `Response::error`, and a panicking handler is
    /// turned into a 500 without affecting other connections.
    pub async fn dispatch(
        self: &Arc<Self>,
        head: &RequestHead,
        body: &[u8],
        remote_addr: SocketAddr,
    ) -> Response {
        if head.method == Method::Options {
            return Response::empty(200);
        }

        let (path, query) = match head.path_and_query() {
            Ok(parts) => parts,
            Err(e) => {
                warn!("Rejecting request from {}: {}", remote_addr, e);
                return Response::error("Invalid request target", 400);
            }
        };

        let Some(route) = self.router.resolve(&head.method, &path) else {
            debug!("No route for {} {}", head.method, path);
            return Response::error("Route not found", 404);
        };

        let handler = route.handler.clone();
        let request = Request {
            method: head.method.clone(),
            url: path,
            query,
            params: route.params,
            body: parse_json_body(body),
            headers: head.headers.clone(),
            remote_addr,
        };

        let ctx = self.clone();
        let outcome = AssertUnwindSafe(async move { handler(ctx, request).await })
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                if let ApiError::Persistence(cause) = &e {
                    error!("{} {}: {}", head.method, head.target, cause);
                } else {
                    debug!("{} {} -> {}", head.method, head.target, e);
                }
                Response::error(&e.to_string(), e.status())
            }
            Err(_) => {
                error!("💥 Handler for {} {} panicked", head.method, head.target);
                Response::error("Internal server error", 500)
            }
        }
    }
}
