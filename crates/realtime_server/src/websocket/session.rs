//! Lifetime of one upgraded WebSocket connection.

use super::handshake::handshake_response;
use super::text_filter::TextFrameFilter;
use crate::connection::ClientHandle;
use crate::error::ServerError;
use crate::messaging::{handle_client_message, message_types, Envelope};
use crate::server::ServerContext;
use crate::utils::current_timestamp;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Role, WebSocketConfig};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

/// How long a closing session waits for queued frames to be flushed.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Greeting sent in the `WELCOME` envelope.
pub const WELCOME_MESSAGE: &str = "Welcome to the RealTime server";

type WsSink<S> = SplitSink<WebSocketStream<TextFrameFilter<S>>, Message>;

/// Completes the handshake and serves the client until either side closes.
///
/// `buffered` holds bytes the client sent right after its upgrade request
/// that were already read off `stream`. The client is in the active set
/// from right after its `WELCOME` is queued until this function returns.
pub async fn run_session<S>(
    mut stream: S,
    buffered: Vec<u8>,
    client_key: &str,
    remote_addr: SocketAddr,
    ctx: Arc<ServerContext>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), ServerError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    stream
        .write_all(handshake_response(client_key).as_bytes())
        .await?;
    stream.flush().await?;

    let max_message = ctx.config.max_frame_bytes;
    let ws_config = WebSocketConfig::default()
        .max_message_size(Some(max_message))
        .max_frame_size(Some(max_message));
    let socket = WebSocketStream::from_raw_socket(
        TextFrameFilter::new(stream, buffered, max_message),
        Role::Server,
        Some(ws_config),
    )
    .await;
    let (sink, mut inbound) = socket.split();

    let (client, outbound) = ClientHandle::new(remote_addr, ctx.config.outbound_queue_capacity);
    let mut writer_task = spawn_writer(sink, outbound);
    let policy = ctx.connections.overflow_policy();

    // Queued ahead of registration so no broadcast can overtake it.
    let welcome = Envelope::new(
        message_types::WELCOME,
        json!({
            "message": WELCOME_MESSAGE,
            "timestamp": current_timestamp(),
            "clients": ctx.connections.client_count() + 1,
        }),
    );
    client.enqueue(welcome.to_message(), policy);
    ctx.connections.register(client.clone());

    let send_close = |code: CloseCode, reason: &'static str| {
        client.enqueue(
            Message::Close(Some(CloseFrame {
                code,
                reason: reason.into(),
            })),
            policy,
        )
    };

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                debug!("Closing client {} for shutdown", client.id);
                send_close(CloseCode::Away, "Server shutting down");
                break;
            }
            _ = client.kicked() => {
                info!("Client {} fell behind and is being disconnected", client.id);
                break;
            }
            event = inbound.next() => match event {
                Some(Ok(Message::Text(text))) => {
                    if let Some(reply) = handle_client_message(text.as_str()) {
                        ctx.connections.send_to(client.id, &reply);
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    debug!("Ignoring {} byte binary message from {}", data.len(), client.id);
                }
                // Pongs to pings are queued by the protocol layer itself.
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    debug!("Client {} sent close {:?}", client.id, frame);
                    break;
                }
                Some(Err(e)) => {
                    warn!("WebSocket error from {}: {}", client.id, e);
                    if let Some(code) = close_code_for(&e) {
                        send_close(code, "");
                    }
                    break;
                }
                None => break,
            },
        }
    }

    ctx.connections.remove(client.id);

    // Dropping the last handle closes the queue; the writer then flushes
    // what is left, including any close reply, and closes the sink.
    drop(client);
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer_task).await.is_err() {
        debug!("Writer for {} did not drain in time", remote_addr);
        writer_task.abort();
    }
    Ok(())
}

/// Close status sent back for a read error, if the socket is still usable.
fn close_code_for(error: &WsError) -> Option<CloseCode> {
    match error {
        WsError::Capacity(_) => Some(CloseCode::Size),
        WsError::Protocol(_) => Some(CloseCode::Protocol),
        _ => None,
    }
}

/// Drains the client's queue into the socket.
fn spawn_writer<S>(mut sink: WsSink<S>, mut outbound: mpsc::Receiver<Message>) -> JoinHandle<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            if let Err(e) = sink.send(message).await {
                debug!("WebSocket write failed: {}", e);
                return;
            }
        }
        let _ = sink.close().await;
    })
}
