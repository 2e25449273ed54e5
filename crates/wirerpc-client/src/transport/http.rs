//! HTTP transport: one POST per outbound message, the response body is the
//! reply

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, RequestBuilder, StatusCode};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use url::Url;

use wirerpc_core::{
    Delivery, EventReceiver, EventSender, Transport, TransportError, TransportEvent, TransportType,
};

/// Request timeout when none is configured
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP transport for the client
#[derive(Debug)]
pub struct HttpTransport {
    /// HTTP client
    client: Client,
    /// Server endpoint URL
    endpoint: Url,
    /// Extra headers sent with every request
    headers: HeaderMap,
    /// How long one POST may take
    request_timeout: Duration,
    /// Where response bodies go
    event_sender: Option<EventSender>,
}

impl HttpTransport {
    /// Create a new HTTP transport
    pub fn new(endpoint: &str) -> Result<Self, TransportError> {
        Self::with_timeout(endpoint, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Create a new HTTP transport abandoning POSTs after `timeout`
    pub fn with_timeout(endpoint: &str, timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("wirerpc-client/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Http(format!("Failed to create HTTP client: {}", e)))?;
        let mut transport = Self::with_client(endpoint, client)?;
        transport.request_timeout = timeout;
        Ok(transport)
    }

    /// Create HTTP transport with custom client
    pub fn with_client(endpoint: &str, client: Client) -> Result<Self, TransportError> {
        let url = Url::parse(endpoint)
            .map_err(|e| TransportError::ConnectionFailed(format!("Invalid URL: {}", e)))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(TransportError::ConnectionFailed(format!(
                "Invalid scheme for HTTP transport: {}",
                url.scheme()
            )));
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        Ok(Self {
            client,
            endpoint: url,
            headers,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            event_sender: None,
        })
    }

    /// Add a header to every request
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self, TransportError> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| TransportError::Http(format!("Invalid header name: {}", e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| TransportError::Http(format!("Invalid header value: {}", e)))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    fn events(&self) -> Result<EventSender, TransportError> {
        self.event_sender.clone().ok_or(TransportError::NotConnected)
    }

    fn post(&self, frame: &str) -> RequestBuilder {
        self.client
            .post(self.endpoint.clone())
            .headers(self.headers.clone())
            .body(frame.to_string())
    }
}

async fn send(request: RequestBuilder) -> Result<(StatusCode, Bytes), reqwest::Error> {
    let response = request.send().await?;
    let status = response.status();
    let body = response.bytes().await?;
    debug!(status = %status, bytes = body.len(), "HTTP response");
    Ok((status, body))
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_connect() {
        TransportError::ConnectionRefused(err.to_string())
    } else {
        TransportError::Http(err.to_string())
    }
}

/// Deliver the reply to one POSTed request or batch.
async fn exchange(request: RequestBuilder, events: EventSender) {
    match send(request).await {
        // Error replies arrive with 4xx/5xx statuses and still carry the
        // JSON-RPC error in the body.
        Ok((_, body)) if !body.is_empty() => {
            let _ = events.send(TransportEvent::Message(body));
        }
        Ok((status, _)) if !status.is_success() => {
            warn!(status = %status, "HTTP request failed without a body");
        }
        Ok(_) => {}
        // The call timer reports the timeout
        Err(e) if e.is_timeout() => debug!(error = %e, "HTTP request abandoned"),
        Err(e) => {
            warn!(error = %e, "HTTP request failed");
            let _ = events.send(TransportEvent::Error(map_reqwest_error(e).to_string()));
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn transport_type(&self) -> TransportType {
        TransportType::Http
    }

    fn endpoint(&self) -> String {
        self.endpoint.to_string()
    }

    /// No socket is held between requests; connecting only opens the event
    /// channel response bodies are delivered on.
    async fn connect(&mut self) -> Result<EventReceiver, TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.event_sender = Some(tx);
        Ok(rx)
    }

    /// Starts the POST and returns; the response body shows up as a
    /// [`TransportEvent::Message`].
    async fn write(&mut self, frame: &str) -> Result<(), TransportError> {
        let events = self.events()?;
        tokio::spawn(exchange(self.post(frame), events));
        Ok(())
    }

    async fn write_notification(&mut self, frame: &str) -> Result<Delivery, TransportError> {
        self.events()?;
        let request = self.post(frame);
        let (ack, delivery) = Delivery::pending();
        tokio::spawn(async move {
            let outcome = match send(request).await {
                Ok((status, _)) if status == StatusCode::NO_CONTENT => Ok(()),
                Ok((status, _)) => Err(TransportError::Http(format!(
                    "No response received for notification (status {})",
                    status
                ))),
                Err(e) => Err(map_reqwest_error(e)),
            };
            let _ = ack.send(outcome);
        });
        Ok(delivery)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if let Some(events) = self.event_sender.take() {
            let _ = events.send(TransportEvent::Closed);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.event_sender.is_some()
    }
}
