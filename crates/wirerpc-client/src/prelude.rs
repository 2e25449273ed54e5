//! # Client Prelude
//!
//! ```rust
//! use wirerpc_client::prelude::*;
//! ```

pub use crate::client::Client;
pub use crate::error::{ClientError, ClientResult};
pub use crate::transport::TransportFactory;

pub use wirerpc_core::prelude::*;
