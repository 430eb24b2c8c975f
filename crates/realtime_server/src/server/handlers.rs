//! Per-connection handling: HTTP keep-alive loop and WebSocket upgrades.

use super::ServerContext;
use crate::error::{HttpError, ServerError};
use crate::http::request::MAX_HEAD_BYTES;
use crate::http::{read_body, read_request_head, Response};
use crate::websocket::{client_key, run_session};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::{debug, warn};

const LINGER_TIMEOUT: Duration = Duration::from_secs(2);
const LINGER_MAX_BYTES: u64 = 4 * 1024 * 1024;

/// Serves one accepted TCP connection.
///
/// Requests are read one at a time until the client closes, asks for
/// `Connection: close`, idles longer than the configured timeout, or sends a
/// request that cannot be parsed. An upgrade request to the WebSocket path
/// hands the socket over to a WebSocket session; an upgrade request anywhere
/// else, or one without `Sec-WebSocket-Key`, drops the socket unanswered.
pub async fn handle_connection(
    stream: TcpStream,
    remote_addr: SocketAddr,
    ctx: Arc<ServerContext>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), ServerError> {
    stream.set_nodelay(true).ok();
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let idle_timeout = ctx.config.timeout();

    loop {
        let head = tokio::select! {
            _ = shutdown.recv() => break,
            read = timeout(idle_timeout, read_request_head(&mut reader, MAX_HEAD_BYTES)) => match read {
                Err(_) => {
                    debug!("Connection from {} idle for {:?}, closing", remote_addr, idle_timeout);
                    break;
                }
                Ok(Ok(Some(head))) => head,
                Ok(Ok(None)) => break,
                Ok(Err(e)) => {
                    reject(&mut write_half, remote_addr, e).await;
                    linger(&mut reader, &mut write_half).await;
                    return Ok(());
                }
            },
        };

        if head.is_websocket_upgrade() {
            let path = head.path_and_query().map(|(path, _)| path).unwrap_or_default();
            if path != ctx.config.websocket_path {
                debug!("Dropping upgrade request for {} from {}", path, remote_addr);
                return Ok(());
            }
            let Some(key) = client_key(&head).map(str::to_string) else {
                warn!("Upgrade request from {} without Sec-WebSocket-Key", remote_addr);
                return Ok(());
            };
            let buffered = reader.buffer().to_vec();
            let stream = reader
                .into_inner()
                .reunite(write_half)
                .map_err(|e| ServerError::Io(std::io::Error::other(e)))?;
            return run_session(stream, buffered, &key, remote_addr, ctx, shutdown).await;
        }

        let body = match timeout(idle_timeout, read_body(&mut reader, &head, ctx.config.max_body_bytes)).await {
            Ok(Ok(body)) => body,
            Ok(Err(e)) => {
                reject(&mut write_half, remote_addr, e).await;
                linger(&mut reader, &mut write_half).await;
                return Ok(());
            }
            Err(_) => {
                let response = Response::error("Request timeout", 408);
                write_half.write_all(&response.to_bytes(false)).await?;
                break;
            }
        };

        let keep_alive = head.keep_alive();
        let response = ctx.dispatch(&head, &body, remote_addr).await;
        debug!("{} {} -> {}", head.method, head.target, response.status);
        write_half.write_all(&response.to_bytes(keep_alive)).await?;

        if !keep_alive {
            break;
        }
    }

    let _ = write_half.shutdown().await;
    Ok(())
}

/// Closes our side first, then discards whatever the client is still
/// sending for a moment so the error response is not lost to a reset.
async fn linger<R, W>(reader: &mut R, writer: &mut W)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let _ = writer.shutdown().await;
    let mut unread = reader.take(LINGER_MAX_BYTES);
    let _ = timeout(LINGER_TIMEOUT, tokio::io::copy(&mut unread, &mut tokio::io::sink())).await;
}

/// Answers an unreadable request with its status code when the socket is
/// still usable.
async fn reject<W>(writer: &mut W, remote_addr: SocketAddr, error: HttpError)
where
    W: AsyncWrite + Unpin,
{
    warn!("Bad request from {}: {}", remote_addr, error);
    if let Some(status) = error.status() {
        let response = Response::error(&error.to_string(), status);
        let _ = writer.write_all(&response.to_bytes(false)).await;
    }
}
