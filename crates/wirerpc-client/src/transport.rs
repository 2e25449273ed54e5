//! Client transports

use url::Url;

use wirerpc_core::{BoxedTransport, ProtocolConfig, TransportError, TransportType};

pub mod http;
pub mod memory;
pub mod tcp;
pub mod ws;

// Re-export transport implementations
pub use http::HttpTransport;
pub use memory::{MemoryPeer, MemoryTransport};
pub use tcp::TcpTransport;
pub use ws::WsTransport;

pub use wirerpc_core::transport::{EventReceiver, Transport, TransportEvent};

/// Helper function to detect transport type from URL
pub fn detect_transport_type(url_str: &str) -> Result<TransportType, TransportError> {
    let url = Url::parse(url_str)
        .map_err(|e| TransportError::ConnectionFailed(format!("Invalid URL: {}", e)))?;

    match url.scheme() {
        "tcp" => Ok(TransportType::Tcp),
        "http" | "https" => Ok(TransportType::Http),
        "ws" | "wss" => Ok(TransportType::WebSocket),
        scheme => Err(TransportError::Unsupported(format!("Unknown scheme: {}", scheme))),
    }
}

/// `tcp://host:port` -> `host:port`
fn tcp_address(url_str: &str) -> Result<String, TransportError> {
    let url = Url::parse(url_str)
        .map_err(|e| TransportError::ConnectionFailed(format!("Invalid URL: {}", e)))?;
    let host = url
        .host_str()
        .ok_or_else(|| TransportError::ConnectionFailed(format!("Missing host in {}", url_str)))?;
    let port = url
        .port()
        .ok_or_else(|| TransportError::ConnectionFailed(format!("Missing port in {}", url_str)))?;
    Ok(format!("{}:{}", host, port))
}

/// Transport factory for creating transport instances
pub struct TransportFactory;

impl TransportFactory {
    /// Create a transport from URL string
    pub fn from_url(url: &str) -> Result<BoxedTransport, TransportError> {
        let transport_type = detect_transport_type(url)?;
        Self::create(transport_type, url)
    }

    /// Create a transport from URL string whose own deadlines follow
    /// `config`. HTTP requests are abandoned once the call timeout passes.
    pub fn from_url_with_config(
        url: &str,
        config: &ProtocolConfig,
    ) -> Result<BoxedTransport, TransportError> {
        match detect_transport_type(url)? {
            TransportType::Http => Ok(Box::new(HttpTransport::with_timeout(url, config.timeout)?)),
            transport_type => Self::create(transport_type, url),
        }
    }

    /// Create a specific transport type
    pub fn create(
        transport_type: TransportType,
        endpoint: &str,
    ) -> Result<BoxedTransport, TransportError> {
        match transport_type {
            TransportType::Tcp => Ok(Box::new(TcpTransport::new(tcp_address(endpoint)?))),
            TransportType::Http => Ok(Box::new(HttpTransport::new(endpoint)?)),
            TransportType::WebSocket => Ok(Box::new(WsTransport::new(endpoint)?)),
        }
    }

    /// List available transport types
    pub fn available_transports() -> Vec<TransportType> {
        vec![TransportType::Tcp, TransportType::Http, TransportType::WebSocket]
    }
}
