//! Server status and the plain-HTTP answer on the WebSocket path.

use crate::error::ApiResult;
use crate::http::response::CONTENT_TYPE_HTML;
use crate::http::{Request, Response};
use crate::server::ServerContext;
use serde_json::json;
use std::sync::Arc;

/// `GET /status`
pub async fn status(ctx: Arc<ServerContext>, _request: Request) -> ApiResult<Response> {
    let store = ctx.store.lock().await;
    let data_size = serde_json::to_string(store.as_map())
        .map(|s| s.len())
        .unwrap_or_default();

    Ok(Response::json(
        &json!({
            "status": "online",
            "version": store.version(),
            "clients": ctx.connections.client_count(),
            "uptime": ctx.uptime().as_secs_f64(),
            "dataSize": data_size,
            "lastUpdate": store.last_update(),
        }),
        200,
    ))
}

/// `GET <websocket path>` without an `Upgrade` header.
pub async fn websocket_info(ctx: Arc<ServerContext>, request: Request) -> ApiResult<Response> {
    let host = escape_html(request.header("host").unwrap_or("localhost"));
    let html = format!(
        "<!DOCTYPE html>\n\
         <html>\n\
         <body>\n\
         <h1>WebSocket endpoint</h1>\n\
         <p>Connect with a WebSocket client.</p>\n\
         <p>URL: ws://{host}{path}</p>\n\
         </body>\n\
         </html>\n",
        path = escape_html(&ctx.config.websocket_path)
    );
    Ok(Response::send(html, 200, CONTENT_TYPE_HTML))
}

/// Escapes text for an HTML body. Header values are client input.
fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
