//! Active client set and the broadcast bus.

use super::{ClientHandle, ConnectionId};
use crate::config::OverflowPolicy;
use crate::messaging::Envelope;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info};

/// Registry of connected WebSocket clients.
///
/// Clients are added once their handshake completes and removed only by
/// their own session when it ends. Broadcasting never removes anyone, so a
/// client whose socket died stays listed until its session notices.
#[derive(Debug)]
pub struct ConnectionManager {
    clients: DashMap<ConnectionId, Arc<ClientHandle>>,
    overflow_policy: OverflowPolicy,
}

impl ConnectionManager {
    pub fn new(overflow_policy: OverflowPolicy) -> Self {
        Self {
            clients: DashMap::new(),
            overflow_policy,
        }
    }

    pub fn overflow_policy(&self) -> OverflowPolicy {
        self.overflow_policy
    }

    /// Adds a client to the active set and marks it open.
    pub fn register(&self, client: Arc<ClientHandle>) {
        client.mark_open();
        info!("🔗 Client {} connected from {}", client.id, client.remote_addr);
        self.clients.insert(client.id, client);
    }

    /// Removes a client from the active set.
    pub fn remove(&self, id: ConnectionId) -> Option<Arc<ClientHandle>> {
        let removed = self.clients.remove(&id).map(|(_, client)| client);
        if let Some(client) = &removed {
            client.mark_closed();
            info!("❌ Client {} disconnected ({})", id, client.remote_addr);
        }
        removed
    }

    /// Number of clients in the active set.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn get(&self, id: ConnectionId) -> Option<Arc<ClientHandle>> {
        self.clients.get(&id).map(|entry| entry.value().clone())
    }

    /// Sends an envelope to one client.
    pub fn send_to(&self, id: ConnectionId, envelope: &Envelope) -> bool {
        match self.get(id) {
            Some(client) => client.enqueue(envelope.to_message(), self.overflow_policy),
            None => false,
        }
    }

    /// Fans `{type, data, timestamp}` out to every open client.
    ///
    /// The envelope is serialized once; every recipient gets a clone of the
    /// same message. Returns how many clients had the message queued.
    pub fn broadcast(&self, kind: &str, data: Value) -> usize {
        let message = Envelope::new(kind, data).to_message();

        let mut delivered = 0;
        for entry in self.clients.iter() {
            let client = entry.value();
            if client.is_open() && client.enqueue(message.clone(), self.overflow_policy) {
                delivered += 1;
            }
        }

        debug!("📡 Broadcast {} to {} client(s)", kind, delivered);
        delivered
    }
}
