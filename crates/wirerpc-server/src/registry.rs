//! Connected clients and server lifecycle events

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, trace};

use wirerpc_core::{Notification, TransportType};

/// Capacity of the server event channel; slow receivers see `Lagged`
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Identifies one accepted connection for the lifetime of the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientInfo {
    pub id: ConnectionId,
    pub peer: SocketAddr,
    pub transport: TransportType,
}

/// Observable server lifecycle
#[derive(Debug, Clone)]
pub enum ServerEvent {
    ClientConnected(ClientInfo),
    ClientDisconnected(ClientInfo),
    Notification(Notification),
}

struct ClientEntry {
    info: ClientInfo,
    outbound: mpsc::UnboundedSender<String>,
}

/// Every live connection and the channel feeding its writer.
///
/// A connection is added once on accept and removed once; the
/// disconnect event fires only for the removal that found it.
pub struct ConnectionRegistry {
    clients: RwLock<HashMap<ConnectionId, ClientEntry>>,
    next_id: AtomicU64,
    events: broadcast::Sender<ServerEvent>,
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("clients", &self.len())
            .finish()
    }
}

impl ConnectionRegistry {
    pub fn new(events: broadcast::Sender<ServerEvent>) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            events,
        }
    }

    /// Add an accepted connection. The returned receiver yields every frame
    /// queued for it, replies and broadcasts alike.
    pub fn register(
        &self,
        peer: SocketAddr,
        transport: TransportType,
    ) -> (ClientInfo, mpsc::UnboundedSender<String>, mpsc::UnboundedReceiver<String>) {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let info = ClientInfo {
            id,
            peer,
            transport,
        };
        let (outbound, receiver) = mpsc::unbounded_channel();

        self.clients.write().insert(
            id,
            ClientEntry {
                info: info.clone(),
                outbound: outbound.clone(),
            },
        );
        info!(connection = %id, peer = %peer, transport = %transport, "Client connected");
        let _ = self.events.send(ServerEvent::ClientConnected(info.clone()));

        (info, outbound, receiver)
    }

    /// Remove a connection, returning it if it was still registered
    pub fn remove(&self, id: ConnectionId) -> Option<ClientInfo> {
        let entry = self.clients.write().remove(&id)?;
        info!(connection = %id, peer = %entry.info.peer, "Client disconnected");
        let _ = self
            .events
            .send(ServerEvent::ClientDisconnected(entry.info.clone()));
        Some(entry.info)
    }

    /// Queue `text` on every connection, returning how many accepted it
    pub fn broadcast(&self, text: &str) -> usize {
        let clients = self.clients.read();
        let delivered = clients
            .values()
            .filter(|entry| entry.outbound.send(text.to_string()).is_ok())
            .count();
        trace!(delivered, total = clients.len(), "Broadcast");
        delivered
    }

    /// Drop every connection, returning how many there were
    pub fn close_all(&self) -> usize {
        let ids: Vec<ConnectionId> = self.clients.read().keys().copied().collect();
        let closed = ids.into_iter().filter_map(|id| self.remove(id)).count();
        debug!(closed, "Closed all connections");
        closed
    }

    pub fn clients(&self) -> Vec<ClientInfo> {
        let mut clients: Vec<ClientInfo> = self
            .clients
            .read()
            .values()
            .map(|entry| entry.info.clone())
            .collect();
        clients.sort_by_key(|info| info.id);
        clients
    }

    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> (ConnectionRegistry, broadcast::Receiver<ServerEvent>) {
        let (events, receiver) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        (ConnectionRegistry::new(events), receiver)
    }

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_remove_fires_disconnect_once() {
        let (registry, mut events) = registry();
        let (info, _tx, _rx) = registry.register(peer(4000), TransportType::Tcp);

        assert!(matches!(events.try_recv(), Ok(ServerEvent::ClientConnected(c)) if c == info));
        assert_eq!(registry.remove(info.id), Some(info.clone()));
        assert_eq!(registry.remove(info.id), None);
        assert!(matches!(events.try_recv(), Ok(ServerEvent::ClientDisconnected(c)) if c == info));
        assert!(events.try_recv().is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_broadcast_reaches_every_client() {
        let (registry, _events) = registry();
        let (_a, _atx, mut a) = registry.register(peer(4001), TransportType::Tcp);
        let (b_info, _btx, b) = registry.register(peer(4002), TransportType::WebSocket);
        drop(b);

        // b's writer is gone so only a accepts the frame
        assert_eq!(registry.broadcast("hello\n"), 1);
        assert_eq!(a.try_recv().unwrap(), "hello\n");

        assert_eq!(registry.clients().len(), 2);
        assert_eq!(registry.close_all(), 2);
        assert_eq!(registry.remove(b_info.id), None);
    }
}
