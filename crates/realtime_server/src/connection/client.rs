//! Per-client state shared between its session, its writer task and the
//! broadcast path.

use super::ConnectionId;
use crate::config::OverflowPolicy;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::{mpsc, Notify};
use tokio_tungstenite::tungstenite::Message;
use tracing::warn;

/// Lifecycle of a WebSocket client. There is no closing half-state: a client
/// goes straight from `Open` to `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Open = 1,
    Closed = 2,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Open,
            _ => ConnectionState::Closed,
        }
    }
}

/// An open WebSocket client.
///
/// Outbound messages are queued here and written by the session's writer
/// task. A broadcast message shares its encoded text between recipients.
#[derive(Debug)]
pub struct ClientHandle {
    pub id: ConnectionId,
    pub remote_addr: SocketAddr,
    pub connected_at: SystemTime,
    state: AtomicU8,
    outbound: mpsc::Sender<Message>,
    kick: Notify,
}

impl ClientHandle {
    /// Creates a handle in the `Connecting` state along with the receiving
    /// end of its outbound queue.
    pub fn new(remote_addr: SocketAddr, capacity: usize) -> (Arc<Self>, mpsc::Receiver<Message>) {
        let (outbound, receiver) = mpsc::channel(capacity.max(1));
        let handle = Arc::new(Self {
            id: ConnectionId::new(),
            remote_addr,
            connected_at: SystemTime::now(),
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            outbound,
            kick: Notify::new(),
        });
        (handle, receiver)
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    pub fn mark_open(&self) {
        // Never reopen a client that was already closed.
        let _ = self.state.compare_exchange(
            ConnectionState::Connecting as u8,
            ConnectionState::Open as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    pub fn mark_closed(&self) {
        self.state
            .store(ConnectionState::Closed as u8, Ordering::Release);
    }

    /// Queues a message without waiting.
    ///
    /// Returns `false` when the message was not queued. On a full queue the
    /// overflow policy decides whether the message is simply dropped or the
    /// client is closed and its session woken so it tears itself down.
    pub fn enqueue(&self, message: Message, policy: OverflowPolicy) -> bool {
        match self.outbound.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                match policy {
                    OverflowPolicy::Drop => {
                        warn!("Outbound queue full for client {}, dropping message", self.id);
                    }
                    OverflowPolicy::Disconnect => {
                        warn!("Outbound queue full for client {}, disconnecting", self.id);
                        self.mark_closed();
                        self.kick.notify_one();
                    }
                }
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Resolves once the client has been told to disconnect.
    pub async fn kicked(&self) {
        self.kick.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:4000".parse().unwrap()
    }

    #[test]
    fn test_state_transitions() {
        let (client, _rx) = ClientHandle::new(addr(), 4);
        assert_eq!(client.state(), ConnectionState::Connecting);
        assert!(!client.is_open());

        client.mark_open();
        assert!(client.is_open());

        client.mark_closed();
        client.mark_open();
        assert_eq!(client.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_enqueue_delivers_in_order() {
        let (client, mut rx) = ClientHandle::new(addr(), 4);
        assert!(client.enqueue(Message::text("one"), OverflowPolicy::Drop));
        assert!(client.enqueue(Message::text("two"), OverflowPolicy::Drop));
        assert_eq!(rx.recv().await.unwrap(), Message::text("one"));
        assert_eq!(rx.recv().await.unwrap(), Message::text("two"));
    }

    #[tokio::test]
    async fn test_overflow_drop_keeps_client_open() {
        let (client, mut rx) = ClientHandle::new(addr(), 1);
        client.mark_open();
        assert!(client.enqueue(Message::text("a"), OverflowPolicy::Drop));
        assert!(!client.enqueue(Message::text("b"), OverflowPolicy::Drop));
        assert!(client.is_open());
        assert_eq!(rx.recv().await.unwrap(), Message::text("a"));
    }

    #[tokio::test]
    async fn test_overflow_disconnect_closes_and_kicks() {
        let (client, _rx) = ClientHandle::new(addr(), 1);
        client.mark_open();
        assert!(client.enqueue(Message::text("a"), OverflowPolicy::Disconnect));
        assert!(!client.enqueue(Message::text("b"), OverflowPolicy::Disconnect));
        assert_eq!(client.state(), ConnectionState::Closed);

        // The stored permit makes this resolve immediately.
        tokio::time::timeout(std::time::Duration::from_secs(1), client.kicked())
            .await
            .unwrap();
    }

    #[test]
    fn test_enqueue_after_receiver_dropped() {
        let (client, rx) = ClientHandle::new(addr(), 1);
        drop(rx);
        assert!(!client.enqueue(Message::text("a"), OverflowPolicy::Disconnect));
        assert_eq!(client.state(), ConnectionState::Connecting);
    }
}
