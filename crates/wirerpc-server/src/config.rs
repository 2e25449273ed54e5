//! Server configuration

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use wirerpc_core::{ConfigError, ProtocolConfig};

/// Configuration shared by the TCP, WebSocket and HTTP servers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to; port 0 picks a free port
    pub bind_address: SocketAddr,
    /// Version and delimiter used for every reply
    pub protocol: ProtocolConfig,
    /// Request path served by the HTTP server
    pub path: String,
    /// Maximum HTTP request body, WebSocket frame, or unterminated TCP
    /// message in bytes
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 8100)),
            protocol: ProtocolConfig::default(),
            path: "/".to_string(),
            max_body_size: 1024 * 1024, // 1MB
        }
    }
}

impl ServerConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.protocol.validate()
    }

    pub fn with_bind_address(mut self, bind_address: SocketAddr) -> Self {
        self.bind_address = bind_address;
        self
    }

    pub fn with_protocol(mut self, protocol: ProtocolConfig) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_max_body_size(mut self, max_body_size: usize) -> Self {
        self.max_body_size = max_body_size;
        self
    }
}
