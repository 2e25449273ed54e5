//! # JSON-RPC Server
//!
//! JSON-RPC 1.0/2.0 servers over TCP, WebSocket and HTTP, built on the
//! `wirerpc-core` protocol engine.
//!
//! ## Features
//!
//! - **Method dispatch**: async handlers registered by method name
//! - **Batches**: concurrent member handling with one array reply
//! - **Notifications**: inbound subscriptions and pushed broadcasts (TCP, WebSocket)
//! - **Lifecycle events**: client connect and disconnect on a broadcast channel
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use serde_json::json;
//! use wirerpc_server::{MethodRegistry, ServerConfig, TcpServer, parse_params};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let methods = MethodRegistry::new().with_fn("add", |params| async move {
//!         let (a, b): (i64, i64) = parse_params(params)?;
//!         Ok(json!(a + b))
//!     });
//!
//!     let server = TcpServer::new(ServerConfig::default(), methods)?;
//!     let addr = server.listen().await?;
//!     println!("listening on {}", addr);
//!
//!     server.notify("ready", None)?;
//!     tokio::signal::ctrl_c().await?;
//!     server.close()?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod http;
pub mod prelude;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod tcp;
pub mod ws;

pub use config::ServerConfig;
pub use dispatcher::MethodRegistry;
pub use error::ServerError;
pub use handler::{FnHandler, HandlerError, JsonRpcHandler, parse_params};
pub use http::HttpServer;
pub use protocol::{Reply, ServerProtocol};
pub use registry::{ClientInfo, ConnectionId, ConnectionRegistry, ServerEvent};
pub use server::ServerCore;
pub use tcp::TcpServer;
pub use ws::WsServer;

pub use wirerpc_core::{JsonRpcVersion, Notification, ProtocolConfig, SubscriptionId};

/// Result type for server operations
pub type Result<T> = std::result::Result<T, ServerError>;
