//! # wirerpc Prelude
//!
//! Convenient re-exports of the most commonly used types.
//!
//! ```rust
//! use wirerpc_core::prelude::*;
//! ```

pub use crate::classify::{Classified, Role};
pub use crate::config::{BackoffConfig, ProtocolConfig};
pub use crate::error::{ErrorCode, ErrorObject, RpcError, TransportError};
pub use crate::format::{ErrorFields, RequestFields, ResponseFields};
pub use crate::framer::MessageBuffer;
pub use crate::ledger::{BatchFailure, CallLedger};
pub use crate::subscribe::{Notification, SubscriptionId};
pub use crate::transport::{Transport, TransportEvent, TransportType};
pub use crate::types::{JsonRpcVersion, RequestId};

pub use std::time::Duration;
