//! HTTP API handlers and the route table binding them.

pub mod data;
pub mod status;

use crate::error::{ApiResult, RouteError};
use crate::http::{Method, Request, Response, Router};
use crate::server::ServerContext;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

/// Future returned by every HTTP handler.
pub type HandlerFuture = BoxFuture<'static, ApiResult<Response>>;

/// A type-erased HTTP handler stored in the route table.
pub type Handler = Arc<dyn Fn(Arc<ServerContext>, Request) -> HandlerFuture + Send + Sync>;

/// Wraps an `async fn(Arc<ServerContext>, Request)` as a [`Handler`].
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Arc<ServerContext>, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ApiResult<Response>> + Send + 'static,
{
    Arc::new(move |ctx: Arc<ServerContext>, request: Request| -> HandlerFuture {
        Box::pin(f(ctx, request))
    })
}

/// Builds the route table for the data API, the status endpoint and the
/// plain-HTTP view of the WebSocket path.
pub fn build_router(websocket_path: &str) -> Result<Router<Handler>, RouteError> {
    let mut router = Router::new();

    router.register(Method::Get, "/status", handler(status::status))?;
    router.register(Method::Get, websocket_path, handler(status::websocket_info))?;

    router.register(Method::Get, "/api/data", handler(data::get_all))?;
    router.register(Method::Get, "/api/data/:key", handler(data::get_one))?;
    router.register(Method::Post, "/api/data", handler(data::create))?;
    router.register(Method::Put, "/api/data/:key", handler(data::update))?;
    router.register(Method::Delete, "/api/data/:key", handler(data::remove))?;

    Ok(router)
}
