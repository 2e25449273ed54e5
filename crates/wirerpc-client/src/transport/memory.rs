//! In-process transport pair, for exercising a client without sockets

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::mpsc;

use wirerpc_core::{EventReceiver, EventSender, Transport, TransportError, TransportEvent, TransportType};

#[derive(Debug, Default)]
struct Shared {
    inbound: Mutex<Option<EventSender>>,
    refusals: AtomicU32,
    attempts: AtomicU32,
}

/// Client half of an in-memory connection
#[derive(Debug)]
pub struct MemoryTransport {
    shared: Arc<Shared>,
    written: mpsc::UnboundedSender<String>,
}

/// The far end of a [`MemoryTransport`]: sees every written frame and
/// feeds bytes back.
#[derive(Debug)]
pub struct MemoryPeer {
    shared: Arc<Shared>,
    written: mpsc::UnboundedReceiver<String>,
}

/// Create a connected transport/peer pair.
pub fn pair() -> (MemoryTransport, MemoryPeer) {
    let shared = Arc::new(Shared::default());
    let (tx, rx) = mpsc::unbounded_channel();
    (
        MemoryTransport {
            shared: shared.clone(),
            written: tx,
        },
        MemoryPeer {
            shared,
            written: rx,
        },
    )
}

#[async_trait]
impl Transport for MemoryTransport {
    fn transport_type(&self) -> TransportType {
        TransportType::Tcp
    }

    fn endpoint(&self) -> String {
        "memory".to_string()
    }

    async fn connect(&mut self) -> Result<EventReceiver, TransportError> {
        self.shared.attempts.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .shared
            .refusals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(TransportError::ConnectionRefused("memory".to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *self.shared.inbound.lock() = Some(tx);
        Ok(rx)
    }

    async fn write(&mut self, frame: &str) -> Result<(), TransportError> {
        if self.shared.inbound.lock().is_none() {
            return Err(TransportError::NotConnected);
        }
        self.written
            .send(frame.to_string())
            .map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.shared.inbound.lock().take();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.shared.inbound.lock().is_some()
    }
}

impl MemoryPeer {
    /// Next frame the client wrote, in write order.
    pub async fn next_frame(&mut self) -> Option<String> {
        self.written.recv().await
    }

    /// A frame already written, without waiting.
    pub fn try_next_frame(&mut self) -> Option<String> {
        self.written.try_recv().ok()
    }

    /// Deliver raw bytes to the client. Returns false when no connection is
    /// open.
    pub fn send(&self, data: &str) -> bool {
        self.push(TransportEvent::Data(Bytes::copy_from_slice(data.as_bytes())))
    }

    /// Close the connection from the far side.
    pub fn disconnect(&self) -> bool {
        let sent = self.push(TransportEvent::Closed);
        self.shared.inbound.lock().take();
        sent
    }

    /// Refuse the next `count` connect attempts.
    pub fn refuse_next(&self, count: u32) {
        self.shared.refusals.store(count, Ordering::SeqCst);
    }

    pub fn connect_attempts(&self) -> u32 {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    fn push(&self, event: TransportEvent) -> bool {
        match self.shared.inbound.lock().as_ref() {
            Some(events) => events.send(event).is_ok(),
            None => false,
        }
    }
}
