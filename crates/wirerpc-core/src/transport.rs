//! Transport seam between the protocol engine and raw I/O.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::oneshot;

use crate::error::TransportError;

/// Transport type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportType {
    /// Raw TCP byte stream
    Tcp,
    /// One HTTP POST per outbound message
    Http,
    /// WebSocket text frames
    WebSocket,
}

impl std::fmt::Display for TransportType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportType::Tcp => write!(f, "TCP"),
            TransportType::Http => write!(f, "HTTP"),
            TransportType::WebSocket => write!(f, "WebSocket"),
        }
    }
}

/// What a transport hands back to the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A chunk of a delimited stream; may hold partial or several messages.
    Data(Bytes),
    /// A complete message body (HTTP response, WebSocket frame). The
    /// trailing delimiter may be missing.
    Message(Bytes),
    /// The peer went away.
    Closed,
    /// The transport failed after connecting.
    Error(String),
}

/// Event receiver returned by [`Transport::connect`]
pub type EventReceiver = tokio::sync::mpsc::UnboundedReceiver<TransportEvent>;

/// Sending half used by transport implementations
pub type EventSender = tokio::sync::mpsc::UnboundedSender<TransportEvent>;

/// Outcome of a notification write.
///
/// Stream transports are done once the frame is written. Request/response
/// transports finish when the peer acknowledges, which may be after the
/// transport has been released.
#[derive(Debug)]
pub struct Delivery {
    ack: Option<oneshot::Receiver<Result<(), TransportError>>>,
}

impl Delivery {
    /// Already delivered
    pub fn written() -> Self {
        Self { ack: None }
    }

    /// Delivered once the returned sender reports the acknowledgement
    pub fn pending() -> (oneshot::Sender<Result<(), TransportError>>, Self) {
        let (sender, receiver) = oneshot::channel();
        (sender, Self { ack: Some(receiver) })
    }
}

impl Future for Delivery {
    type Output = Result<(), TransportError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match this.ack.as_mut() {
            None => Poll::Ready(Ok(())),
            Some(receiver) => match Pin::new(receiver).poll(cx) {
                Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
                Poll::Ready(Err(_)) => Poll::Ready(Err(TransportError::Closed)),
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

/// Transport trait defining the interface for all transport implementations
#[async_trait]
pub trait Transport: Send + Sync {
    /// Get transport type
    fn transport_type(&self) -> TransportType;

    /// Human readable remote endpoint, e.g. `127.0.0.1:8100`
    fn endpoint(&self) -> String;

    /// Open the connection and start delivering inbound events.
    async fn connect(&mut self) -> Result<EventReceiver, TransportError>;

    /// Write one formatted frame (request or batch). Replies arrive as
    /// events; a write never waits for them.
    async fn write(&mut self, frame: &str) -> Result<(), TransportError>;

    /// Write a notification frame. Transports with a request/response cycle
    /// override this and hand back a pending [`Delivery`] for the
    /// acknowledgement.
    async fn write_notification(&mut self, frame: &str) -> Result<Delivery, TransportError> {
        self.write(frame).await?;
        Ok(Delivery::written())
    }

    /// Tear the connection down. Closing a closed transport is a no-op.
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Check if connected
    fn is_connected(&self) -> bool;
}

/// Type alias for a boxed transport
pub type BoxedTransport = Box<dyn Transport>;
