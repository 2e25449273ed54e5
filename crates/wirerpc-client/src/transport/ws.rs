//! WebSocket transport: each text frame carries delimited messages

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};
use url::Url;

use wirerpc_core::{EventReceiver, EventSender, Transport, TransportError, TransportEvent, TransportType};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport for the client
pub struct WsTransport {
    url: Url,
    sink: Option<SplitSink<WsStream, Message>>,
    reader: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for WsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsTransport")
            .field("url", &self.url.as_str())
            .field("connected", &self.sink.is_some())
            .finish()
    }
}

impl WsTransport {
    pub fn new(url: &str) -> Result<Self, TransportError> {
        let url = Url::parse(url)
            .map_err(|e| TransportError::ConnectionFailed(format!("Invalid URL: {}", e)))?;

        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(TransportError::ConnectionFailed(format!(
                "Invalid scheme for WebSocket transport: {}",
                url.scheme()
            )));
        }

        Ok(Self {
            url,
            sink: None,
            reader: None,
        })
    }

    fn stop_reader(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

fn map_ws_error(err: tungstenite::Error) -> TransportError {
    match err {
        tungstenite::Error::Io(e) => TransportError::from_connect_error(e),
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            TransportError::Closed
        }
        other => TransportError::WebSocket(other.to_string()),
    }
}

async fn read_loop(mut stream: SplitStream<WsStream>, events: EventSender) {
    while let Some(frame) = stream.next().await {
        let event = match frame {
            Ok(Message::Text(text)) => {
                trace!(bytes = text.len(), "Received text frame");
                TransportEvent::Message(Bytes::copy_from_slice(text.as_bytes()))
            }
            Ok(Message::Binary(data)) => TransportEvent::Message(data),
            Ok(Message::Close(_)) => {
                debug!("Server closed the WebSocket");
                break;
            }
            // Ping/pong are answered by tungstenite
            Ok(_) => continue,
            Err(e) => {
                let _ = events.send(TransportEvent::Error(e.to_string()));
                return;
            }
        };
        if events.send(event).is_err() {
            return;
        }
    }
    let _ = events.send(TransportEvent::Closed);
}

#[async_trait]
impl Transport for WsTransport {
    fn transport_type(&self) -> TransportType {
        TransportType::WebSocket
    }

    fn endpoint(&self) -> String {
        self.url.to_string()
    }

    async fn connect(&mut self) -> Result<EventReceiver, TransportError> {
        self.stop_reader();
        self.sink = None;

        let (socket, _response) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(map_ws_error)?;
        let (sink, stream) = socket.split();

        let (tx, rx) = mpsc::unbounded_channel();
        self.reader = Some(tokio::spawn(read_loop(stream, tx)));
        self.sink = Some(sink);
        Ok(rx)
    }

    async fn write(&mut self, frame: &str) -> Result<(), TransportError> {
        let sink = self.sink.as_mut().ok_or(TransportError::NotConnected)?;
        sink.send(Message::text(frame.to_string()))
            .await
            .map_err(map_ws_error)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.stop_reader();
        if let Some(mut sink) = self.sink.take() {
            let _ = sink.send(Message::Close(None)).await;
            let _ = sink.close().await;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.sink.is_some()
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.stop_reader();
    }
}
