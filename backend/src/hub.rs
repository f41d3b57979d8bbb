//! Outbound fan-out. Every connection owns one unbounded channel; messages to
//! one connection, to a player's tabs and to everyone all go through it, so a
//! slow reader delays its own messages but never loses any.

use std::collections::HashMap;

use tokio::sync::{mpsc, RwLock};

use crate::protocol::ServerMessage;
use crate::registry::ConnectionId;

#[derive(Default)]
pub struct Hub {
    connections: RwLock<HashMap<ConnectionId, mpsc::UnboundedSender<ServerMessage>>>,
}

/// Receiving side of one connection.
pub struct Inbox {
    rx: mpsc::UnboundedReceiver<ServerMessage>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn attach(&self, connection_id: ConnectionId) -> Inbox {
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections.write().await.insert(connection_id, tx);
        Inbox { rx }
    }

    /// Dropping the sender ends the connection's inbox.
    pub async fn detach(&self, connection_id: ConnectionId) {
        self.connections.write().await.remove(&connection_id);
    }

    pub async fn send_to(&self, connection_id: ConnectionId, message: ServerMessage) {
        self.send_to_each(&[connection_id], message).await;
    }

    pub async fn send_to_each(&self, connection_ids: &[ConnectionId], message: ServerMessage) {
        let connections = self.connections.read().await;
        for connection_id in connection_ids {
            if let Some(tx) = connections.get(connection_id) {
                deliver(*connection_id, tx, message.clone());
            }
        }
    }

    /// Deliver to every attached connection.
    pub async fn broadcast(&self, message: ServerMessage) {
        let connections = self.connections.read().await;
        for (connection_id, tx) in connections.iter() {
            deliver(*connection_id, tx, message.clone());
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }
}

fn deliver(
    connection_id: ConnectionId,
    tx: &mpsc::UnboundedSender<ServerMessage>,
    message: ServerMessage,
) {
    if tx.send(message).is_err() {
        tracing::debug!(connection_id = %connection_id, "inbox already closed");
    }
}

impl Inbox {
    /// Next message for this connection. `None` once the connection has been
    /// detached and everything queued before that was read.
    pub async fn recv(&mut self) -> Option<ServerMessage> {
        self.rx.recv().await
    }

    /// Non-blocking variant of [`Inbox::recv`].
    pub fn try_recv(&mut self) -> Option<ServerMessage> {
        self.rx.try_recv().ok()
    }
}
