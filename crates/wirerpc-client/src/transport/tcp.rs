//! TCP transport: one socket, delimited messages in both directions

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use wirerpc_core::{EventReceiver, EventSender, Transport, TransportError, TransportEvent, TransportType};

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// TCP transport for the client
#[derive(Debug)]
pub struct TcpTransport {
    /// `host:port` of the server
    addr: String,
    writer: Option<OwnedWriteHalf>,
    reader: Option<JoinHandle<()>>,
}

impl TcpTransport {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            writer: None,
            reader: None,
        }
    }

    fn stop_reader(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

async fn read_loop(mut read: OwnedReadHalf, events: EventSender) {
    let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);
    loop {
        match read.read_buf(&mut buf).await {
            Ok(0) => {
                debug!("Server closed the connection");
                let _ = events.send(TransportEvent::Closed);
                return;
            }
            Ok(n) => {
                trace!(bytes = n, "Received data");
                if events.send(TransportEvent::Data(buf.split().freeze())).is_err() {
                    return;
                }
                buf.reserve(READ_BUFFER_SIZE);
            }
            Err(e) => {
                let _ = events.send(TransportEvent::Error(e.to_string()));
                return;
            }
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn transport_type(&self) -> TransportType {
        TransportType::Tcp
    }

    fn endpoint(&self) -> String {
        self.addr.clone()
    }

    async fn connect(&mut self) -> Result<EventReceiver, TransportError> {
        // A previous connection may have died without close()
        self.stop_reader();
        self.writer = None;

        let stream = TcpStream::connect(&self.addr)
            .await
            .map_err(TransportError::from_connect_error)?;
        stream.set_nodelay(true)?;
        let (read, write) = stream.into_split();

        let (tx, rx) = mpsc::unbounded_channel();
        self.reader = Some(tokio::spawn(read_loop(read, tx)));
        self.writer = Some(write);
        Ok(rx)
    }

    async fn write(&mut self, frame: &str) -> Result<(), TransportError> {
        let writer = self.writer.as_mut().ok_or(TransportError::NotConnected)?;
        writer.write_all(frame.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.stop_reader();
        if let Some(mut writer) = self.writer.take() {
            // The peer may already be gone
            let _ = writer.shutdown().await;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.writer.is_some()
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.stop_reader();
    }
}
