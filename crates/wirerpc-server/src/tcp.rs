//! Delimited JSON-RPC over raw TCP

use std::net::SocketAddr;
use std::ops::Deref;
use std::sync::Arc;

use bytes::BytesMut;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, warn};

use wirerpc_core::{MessageBuffer, TransportType};

use crate::Result;
use crate::config::ServerConfig;
use crate::dispatcher::MethodRegistry;
use crate::server::{ServerCore, Shared};

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// TCP server. Each connection is read in arrival order; replies and
/// broadcasts share one writer per connection.
#[derive(Debug)]
pub struct TcpServer {
    core: ServerCore,
}

impl TcpServer {
    pub fn new(config: ServerConfig, methods: MethodRegistry) -> Result<Self> {
        Ok(Self {
            core: ServerCore::new(config, methods)?,
        })
    }

    /// Start accepting connections, returning the bound address
    pub async fn listen(&self) -> Result<SocketAddr> {
        self.core.start(TransportType::Tcp, serve_connection).await
    }

    /// Push a notification to every connected client
    pub fn notify(&self, method: &str, params: Option<Value>) -> Result<usize> {
        self.core.broadcast_notification(method, params)
    }
}

impl Deref for TcpServer {
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
    if let Err(err) = stream.set_nodelay(true) {
        debug!(peer = %peer, error = %err, "Unable to set TCP_NODELAY");
    }
    let (info, replies, mut outbound) = shared.registry.register(peer, TransportType::Tcp);
    let (mut reader, mut writer) = stream.into_split();

    let connection = info.id;
    let write_task = tokio::spawn(async move {
        while let Some(text) = outbound.recv().await {
            if let Err(err) = writer.write_all(text.as_bytes()).await {
                debug!(connection = %connection, error = %err, "Write failed");
                break;
            }
        }
        let _ = writer.shutdown().await;
    });

    let mut buffer = MessageBuffer::new(shared.protocol.delimiter());
    let mut chunk = BytesMut::with_capacity(READ_BUFFER_SIZE);
    'connection: loop {
        let read = tokio::select! {
            _ = shutdown.changed() => break,
            read = reader.read_buf(&mut chunk) => read,
        };
        match read {
            Ok(0) => break,
            Ok(_) => {
                buffer.push(&chunk);
                chunk.clear();
            }
            Err(err) => {
                debug!(connection = %info.id, error = %err, "Read failed");
                break;
            }
        }

        while let Some(message) = buffer.handle_data() {
            let reply = tokio::select! {
                _ = shutdown.changed() => break 'connection,
                reply = shared.protocol.handle_message(&message) => reply,
            };
            if let Some(reply) = reply {
                let _ = replies.send(reply.text);
            }
        }
        if buffer.buffered_len() > shared.config.max_body_size {
            warn!(
                connection = %info.id,
                buffered = buffer.buffered_len(),
                limit = shared.config.max_body_size,
                "Unterminated message exceeds the size limit, dropping connection"
            );
            break;
        }
    }

    shared.registry.remove(info.id);
    drop(replies);
    let _ = write_task.await;
}
