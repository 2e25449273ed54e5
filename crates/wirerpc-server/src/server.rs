//! Listener lifecycle shared by every server transport

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use wirerpc_core::{Notification, SubscriptionId, TransportType};

use crate::config::ServerConfig;
use crate::dispatcher::MethodRegistry;
use crate::error::ServerError;
use crate::protocol::ServerProtocol;
use crate::registry::{ClientInfo, ConnectionRegistry, EVENT_CHANNEL_CAPACITY, ServerEvent};
use crate::Result;

/// State every connection task needs
#[derive(Debug)]
pub(crate) struct Shared {
    pub config: ServerConfig,
    pub protocol: ServerProtocol,
    pub registry: ConnectionRegistry,
}

enum ListenState {
    Idle,
    Binding,
    Listening {
        local_addr: SocketAddr,
        shutdown: watch::Sender<bool>,
        accept: JoinHandle<()>,
    },
}

/// Bind/accept/close bookkeeping and the operations every server exposes.
/// Transport servers dereference to this.
pub struct ServerCore {
    shared: Arc<Shared>,
    events: broadcast::Sender<ServerEvent>,
    state: Mutex<ListenState>,
}

impl std::fmt::Debug for ServerCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerCore")
            .field("bind_address", &self.shared.config.bind_address)
            .field("local_addr", &self.local_addr())
            .field("clients", &self.shared.registry.len())
            .finish()
    }
}

impl ServerCore {
    pub(crate) fn new(config: ServerConfig, methods: MethodRegistry) -> Result<Self> {
        config.validate()?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let protocol = ServerProtocol::new(methods, &config.protocol).with_events(events.clone());
        let registry = ConnectionRegistry::new(events.clone());
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                protocol,
                registry,
            }),
            events,
            state: Mutex::new(ListenState::Idle),
        })
    }

    /// Bind the configured address and hand every accepted stream to
    /// `serve`. A second call while listening is rejected.
    pub(crate) async fn start<F, Fut>(
        &self,
        transport: TransportType,
        serve: F,
    ) -> Result<SocketAddr>
    where
        F: Fn(TcpStream, SocketAddr, Arc<Shared>, watch::Receiver<bool>) -> Fut
            + Send
            + Sync
            + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        {
            let mut state = self.state.lock();
            if !matches!(*state, ListenState::Idle) {
                return Err(ServerError::AlreadyListening);
            }
            *state = ListenState::Binding;
        }

        let bound = match TcpListener::bind(self.shared.config.bind_address).await {
            Ok(listener) => listener.local_addr().map(|addr| (listener, addr)),
            Err(err) => Err(err),
        };
        let (listener, local_addr) = match bound {
            Ok(bound) => bound,
            Err(err) => {
                *self.state.lock() = ListenState::Idle;
                return Err(err.into());
            }
        };

        let (shutdown, shutdown_rx) = watch::channel(false);
        let accept = tokio::spawn(accept_loop(
            listener,
            transport,
            self.shared.clone(),
            shutdown_rx,
            serve,
        ));
        *self.state.lock() = ListenState::Listening {
            local_addr,
            shutdown,
            accept,
        };

        info!(transport = %transport, address = %local_addr, "Server listening");
        Ok(local_addr)
    }

    /// Stop accepting and drop every connection
    pub fn close(&self) -> Result<()> {
        let (local_addr, shutdown, accept) = {
            let mut state = self.state.lock();
            match std::mem::replace(&mut *state, ListenState::Idle) {
                ListenState::Listening {
                    local_addr,
                    shutdown,
                    accept,
                } => (local_addr, shutdown, accept),
                other => {
                    *state = other;
                    return Err(ServerError::NotListening);
                }
            }
        };

        let _ = shutdown.send(true);
        accept.abort();
        let closed = self.shared.registry.close_all();
        info!(address = %local_addr, clients = closed, "Server closed");
        Ok(())
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &*self.state.lock() {
            ListenState::Listening { local_addr, .. } => Some(*local_addr),
            _ => None,
        }
    }

    pub fn is_listening(&self) -> bool {
        self.local_addr().is_some()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    /// Subscribe to connection and notification events
    pub fn events(&self) -> broadcast::Receiver<ServerEvent> {
        self.events.subscribe()
    }

    /// Call `handler` for every notification a client sends with `method`
    pub fn subscribe<F>(&self, method: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: Fn(Notification) + Send + Sync + 'static,
    {
        self.shared.protocol.subscribe(method, handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.protocol.unsubscribe(id)
    }

    pub fn connected_clients(&self) -> Vec<ClientInfo> {
        self.shared.registry.clients()
    }

    /// Format a notification and queue it on every connection
    pub(crate) fn broadcast_notification(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<usize> {
        let text = self.shared.protocol.format_notification(method, params)?;
        let delivered = self.shared.registry.broadcast(&text);
        debug!(method = %method, delivered, "Notified clients");
        Ok(delivered)
    }
}

impl Drop for ServerCore {
    fn drop(&mut self) {
        if let ListenState::Listening {
            shutdown, accept, ..
        } = std::mem::replace(&mut *self.state.lock(), ListenState::Idle)
        {
            let _ = shutdown.send(true);
            accept.abort();
        }
    }
}

async fn accept_loop<F, Fut>(
    listener: TcpListener,
    transport: TransportType,
    shared: Arc<Shared>,
    mut shutdown: watch::Receiver<bool>,
    serve: F,
) where
    F: Fn(TcpStream, SocketAddr, Arc<Shared>, watch::Receiver<bool>) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send + 'static,
{
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(transport = %transport, peer = %peer, "Accepted connection");
                    tokio::spawn(serve(stream, peer, shared.clone(), shutdown.clone()));
                }
                Err(err) => warn!(transport = %transport, error = %err, "Failed to accept connection"),
            }
        }
    }
}
