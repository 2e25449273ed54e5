//! # Server Prelude
//!
//! ```rust
//! use wirerpc_server::prelude::*;
//! ```

pub use crate::config::ServerConfig;
pub use crate::dispatcher::MethodRegistry;
pub use crate::error::ServerError;
pub use crate::handler::{HandlerError, JsonRpcHandler, parse_params};
pub use crate::registry::{ClientInfo, ServerEvent};
pub use crate::{HttpServer, TcpServer, WsServer};

pub use wirerpc_core::prelude::*;
