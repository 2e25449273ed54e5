//! # JSON-RPC Client
//!
//! A JSON-RPC 1.0/2.0 client over TCP, WebSocket or HTTP, built on the
//! `wirerpc-core` protocol engine.
//!
//! ## Features
//!
//! - **Multi-transport support**: TCP, WebSocket and HTTP
//! - **Both protocol versions**: 1.0 and 2.0 message shapes
//! - **Correlation**: concurrent requests and batches with per-call timeouts
//! - **Notifications**: subscribe to server-pushed notifications by method
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use serde_json::json;
//! use wirerpc_client::{Client, ProtocolConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::from_url("tcp://127.0.0.1:8100", ProtocolConfig::default())?;
//!     client.connect().await?;
//!
//!     let response = client.request("add", Some(json!([1, 2]))).await?;
//!     println!("1 + 2 = {}", response["result"]);
//!
//!     client.end().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Batches
//!
//! ```rust,no_run
//! # use serde_json::json;
//! # use wirerpc_client::{Client, ProtocolConfig};
//! # async fn run(client: Client) -> Result<(), Box<dyn std::error::Error>> {
//! let responses = client
//!     .batch(vec![
//!         client.message("add", Some(json!([1, 2])), true)?,
//!         client.message("log", Some(json!(["added"])), false)?,
//!     ])
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod prelude;
pub mod transport;

pub use client::Client;
pub use error::{ClientError, ClientResult};
pub use transport::{
    HttpTransport, MemoryPeer, MemoryTransport, TcpTransport, TransportFactory, WsTransport,
};

pub use wirerpc_core::{
    BackoffConfig, ConnectionState, JsonRpcVersion, Notification, ProtocolConfig, RequestId,
    RpcError, SubscriptionId,
};
