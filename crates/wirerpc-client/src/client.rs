//! Main client implementation

use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use wirerpc_core::{
    BoxedTransport, CallLedger, Classified, ConnectionLifecycle, ConnectionState, EventReceiver,
    MessageBuffer, Notification, ProtocolConfig, RequestFields, RequestId, Role, RpcError,
    SubscriptionId, SubscriptionRegistry, TransportEvent, format_batch, format_request,
    parse_message,
};

use crate::error::{ClientError, ClientResult};
use crate::transport::TransportFactory;

/// JSON-RPC client over any [`wirerpc_core::Transport`]
pub struct Client {
    /// Transport layer
    transport: Arc<tokio::sync::Mutex<BoxedTransport>>,
    /// Configuration
    config: ProtocolConfig,
    /// Outstanding calls and batches
    ledger: CallLedger,
    lifecycle: Arc<ConnectionLifecycle>,
    subscriptions: Arc<SubscriptionRegistry>,
    /// Next request id; ids are never reused
    next_id: AtomicI64,
    /// Inbound message task of the current connection
    reader: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .field("state", &self.lifecycle.state())
            .field("ledger", &self.ledger)
            .finish()
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        self.ledger.close_all();
    }
}

/// Routes inbound messages of one connection.
struct Inbound {
    ledger: CallLedger,
    subscriptions: Arc<SubscriptionRegistry>,
}

impl Inbound {
    fn handle_message(&self, raw: &str) {
        if raw.trim().is_empty() {
            trace!("Skipping empty message");
            return;
        }

        match parse_message(raw, Role::Client) {
            Ok(Classified::Response { id: Some(id), message }) => {
                debug!(id = %id, "Received response");
                self.ledger.resolve_call(&id, message);
            }
            Ok(Classified::Error { id: Some(id), error, .. }) => {
                debug!(id = %id, code = error.code(), "Received error response");
                self.ledger.reject_call(&id, error);
            }
            Ok(Classified::Response { id: None, message }) => {
                warn!("Message has no outstanding calls: {}", message);
            }
            Ok(Classified::Error { id: None, error, .. }) => {
                warn!(code = error.code(), "Message has no outstanding calls: {}", error);
            }
            Ok(Classified::Notification {
                method,
                params,
                message,
            }) => {
                self.subscriptions.dispatch(Notification {
                    method,
                    params,
                    message,
                });
            }
            Ok(Classified::Batch(batch)) => {
                for member in &batch.notifications {
                    if let Some(method) = member.get("method").and_then(Value::as_str) {
                        self.subscriptions.dispatch(Notification {
                            method: method.to_string(),
                            params: member.get("params").filter(|p| !p.is_null()).cloned(),
                            message: member.clone(),
                        });
                    }
                }
                if !batch.ids.is_empty() {
                    self.ledger.settle_batch(batch);
                }
            }
            Ok(Classified::Request { method, .. }) => {
                warn!(method = %method, "Ignoring request sent to a client");
            }
            Err(e) => {
                error!(code = e.code().code(), "{}", e);
            }
        }
    }
}

async fn read_loop(
    mut events: EventReceiver,
    mut buffer: MessageBuffer,
    inbound: Inbound,
    lifecycle: Arc<ConnectionLifecycle>,
) {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Data(chunk) => buffer.push(&chunk),
            TransportEvent::Message(body) => buffer.push_message(&body),
            TransportEvent::Closed => {
                info!("Server disconnected");
                break;
            }
            TransportEvent::Error(e) => {
                error!(error = %e, "Transport error");
                break;
            }
        }
        while let Some(message) = buffer.handle_data() {
            inbound.handle_message(&message);
        }
    }

    lifecycle.mark_disconnected();
    inbound.ledger.close_all();
}

impl Client {
    /// Create a new client with the given transport
    pub fn new(transport: BoxedTransport, config: ProtocolConfig) -> ClientResult<Self> {
        config.validate()?;
        Ok(Self {
            transport: Arc::new(tokio::sync::Mutex::new(transport)),
            ledger: CallLedger::new(config.version),
            lifecycle: Arc::new(ConnectionLifecycle::new(
                config.retries,
                config.backoff.clone(),
            )),
            subscriptions: Arc::new(SubscriptionRegistry::new()),
            next_id: AtomicI64::new(1),
            reader: parking_lot::Mutex::new(None),
            config,
        })
    }

    /// Create a client for `tcp://`, `ws://` or `http://` URLs
    pub fn from_url(url: &str, config: ProtocolConfig) -> ClientResult<Self> {
        Self::new(TransportFactory::from_url_with_config(url, &config)?, config)
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.lifecycle.state()
    }

    /// Requests still waiting for a reply
    pub fn pending_calls(&self) -> usize {
        self.ledger.pending_calls()
    }

    pub fn pending_batches(&self) -> usize {
        self.ledger.pending_batches()
    }

    /// Connect, retrying refused connections. Resolves with the endpoint.
    ///
    /// Fails at once if a connection exists or another `connect` is still
    /// retrying.
    pub async fn connect(&self) -> ClientResult<String> {
        let attempt = self.lifecycle.begin()?;
        let (events, endpoint) = {
            let mut transport = self.transport.lock().await;
            let events = attempt.run(&mut **transport).await?;
            (events, transport.endpoint())
        };

        let inbound = Inbound {
            ledger: self.ledger.clone(),
            subscriptions: self.subscriptions.clone(),
        };
        let reader = tokio::spawn(read_loop(
            events,
            MessageBuffer::new(&self.config.delimiter),
            inbound,
            self.lifecycle.clone(),
        ));
        if let Some(previous) = self.reader.lock().replace(reader) {
            previous.abort();
        }

        Ok(endpoint)
    }

    /// Close the connection and fail every outstanding call.
    pub async fn end(&self) -> ClientResult<()> {
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        let closed = self.transport.lock().await.close().await;
        self.lifecycle.mark_disconnected();
        let failed = self.ledger.close_all();
        info!(failed, "Connection ended");
        closed.map_err(Into::into)
    }

    fn ensure_connected(&self) -> ClientResult<()> {
        if self.lifecycle.state() == ConnectionState::Connected {
            Ok(())
        } else {
            Err(ClientError::NotConnected)
        }
    }

    fn next_request_id(&self) -> RequestId {
        RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Format a request (`with_id`, consuming the next id) or a
    /// notification, for use with [`batch`](Self::batch).
    pub fn message(&self, method: &str, params: Option<Value>, with_id: bool) -> ClientResult<String> {
        let id = with_id.then(|| self.next_request_id());
        self.format(method, params.as_ref(), id.as_ref())
    }

    fn format(&self, method: &str, params: Option<&Value>, id: Option<&RequestId>) -> ClientResult<String> {
        Ok(format_request(&RequestFields {
            method: &Value::String(method.to_string()),
            params,
            id,
            version: self.config.version,
            delimiter: &self.config.delimiter,
        })?)
    }

    /// Send a request and wait for its response message.
    ///
    /// Fails with the peer's error reply, a timeout, or a connection-closed
    /// error.
    pub async fn request(&self, method: &str, params: Option<Value>) -> ClientResult<Value> {
        self.ensure_connected()?;
        let id = self.next_request_id();
        let frame = self.format(method, params.as_ref(), Some(&id))?;

        let handle = self.ledger.register_call(id.clone(), self.config.timeout)?;
        debug!(id = %id, method, "Sending request");
        if let Err(e) = self.transport.lock().await.write(&frame).await {
            error!(id = %id, error = %e, "Failed to send request");
            self.ledger.reject_call(
                &id,
                RpcError::connection_closed(self.config.version, Some(id.clone())),
            );
            return Err(e.into());
        }

        Ok(handle.await?)
    }

    /// Send a notification. Completes once the write succeeds, or on HTTP
    /// once the server acknowledges it.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> ClientResult<()> {
        self.ensure_connected()?;
        let frame = self.format(method, params.as_ref(), None)?;
        debug!(method, "Sending notification");
        let delivery = self
            .transport
            .lock()
            .await
            .write_notification(&frame)
            .await?;
        delivery.await?;
        Ok(())
    }

    /// Send pre-formatted requests and notifications as one batch and wait
    /// for the response array.
    ///
    /// A batch of notifications only has nothing to wait for and resolves
    /// with an empty array once written.
    pub async fn batch(&self, requests: Vec<String>) -> ClientResult<Vec<Value>> {
        self.ensure_connected()?;
        let (members, frame) = format_batch(&requests, &self.config.delimiter)?;
        let ids: std::collections::BTreeSet<RequestId> = members
            .iter()
            .filter_map(|member| member.get("id").and_then(RequestId::from_value))
            .collect();

        if ids.is_empty() {
            self.transport.lock().await.write(&frame).await?;
            return Ok(Vec::new());
        }

        let handle = self.ledger.register_batch(ids, self.config.timeout)?;
        let key = handle.key().clone();
        debug!(batch = %key, "Sending batch");
        if let Err(e) = self.transport.lock().await.write(&frame).await {
            error!(batch = %key, error = %e, "Failed to send batch");
            self.ledger
                .reject_batch(&key, RpcError::connection_closed(self.config.version, None));
            return Err(e.into());
        }

        Ok(handle.await?)
    }

    /// Invoke `handler` for every notification named `method`.
    pub fn subscribe<F>(&self, method: &str, handler: F) -> SubscriptionId
    where
        F: Fn(Notification) + Send + Sync + 'static,
    {
        self.subscriptions.subscribe(method, handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscriptions.unsubscribe(id)
    }

    /// Drop every handler for `method`
    pub fn unsubscribe_all(&self, method: &str) -> usize {
        self.subscriptions.unsubscribe_all(method)
    }
}
