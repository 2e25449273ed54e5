//! JSON-RPC over WebSocket text frames

use std::net::SocketAddr;
use std::ops::Deref;
use std::sync::Arc;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use wirerpc_core::{MessageBuffer, TransportType};

use crate::Result;
use crate::config::ServerConfig;
use crate::dispatcher::MethodRegistry;
use crate::server::{ServerCore, Shared};

/// WebSocket server. A frame may carry one message or several delimited
/// ones; replies go out as text frames.
#[derive(Debug)]
pub struct WsServer {
    core: ServerCore,
}

impl WsServer {
    pub fn new(config: ServerConfig, methods: MethodRegistry) -> Result<Self> {
        Ok(Self {
            core: ServerCore::new(config, methods)?,
        })
    }

    /// Start accepting connections, returning the bound address
    pub async fn listen(&self) -> Result<SocketAddr> {
        self.core.start(TransportType::WebSocket, serve_connection).await
    }

    /// Push a notification to every connected client
    pub fn notify(&self, method: &str, params: Option<Value>) -> Result<usize> {
        self.core.broadcast_notification(method, params)
    }
}

impl Deref for WsServer {
    type Target = ServerCore;

    fn deref(&self) -> &Self::Target {
        &self.core
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    shared: Arc<Shared>,
    mut shutdown: watch::Receiver<bool>,
) {
    let socket = match tokio_tungstenite::accept_async(stream).await {
        Ok(socket) => socket,
        Err(err) => {
            debug!(peer = %peer, error = %err, "WebSocket handshake failed");
            return;
        }
    };
    let (mut sink, mut source) = socket.split();
    let (info, replies, mut outbound) = shared.registry.register(peer, TransportType::WebSocket);

    let connection = info.id;
    let write_task = tokio::spawn(async move {
        while let Some(text) = outbound.recv().await {
            if let Err(err) = sink.send(Message::text(text)).await {
                debug!(connection = %connection, error = %err, "Write failed");
                break;
            }
        }
        let _ = sink.close().await;
    });

    let mut buffer = MessageBuffer::new(shared.protocol.delimiter());
    'connection: loop {
        let frame = tokio::select! {
            _ = shutdown.changed() => break,
            frame = source.next() => frame,
        };
        let payload = match frame {
            Some(Ok(Message::Text(text))) => Bytes::from(text),
            Some(Ok(Message::Binary(data))) => data,
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(err)) => {
                debug!(connection = %info.id, error = %err, "Read failed");
                break;
            }
        };
        if payload.len() > shared.config.max_body_size {
            warn!(
                connection = %info.id,
                size = payload.len(),
                limit = shared.config.max_body_size,
                "Frame exceeds the size limit, dropping connection"
            );
            break;
        }
        buffer.push_message(&payload);

        while let Some(message) = buffer.handle_data() {
            let reply = tokio::select! {
                _ = shutdown.changed() => break 'connection,
                reply = shared.protocol.handle_message(&message) => reply,
            };
            if let Some(reply) = reply {
                let _ = replies.send(reply.text);
            }
        }
    }

    shared.registry.remove(info.id);
    drop(replies);
    let _ = write_task.await;
}
