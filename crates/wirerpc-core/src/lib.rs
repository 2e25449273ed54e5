//! # JSON-RPC 1.0/2.0 Protocol Engine
//!
//! The transport-agnostic core shared by the `wirerpc` client and server.
//! This crate turns delimited byte streams into classified JSON-RPC messages
//! and correlates outbound calls with their replies.
//!
//! ## Features
//! - Delimiter framing tolerant of arbitrary chunking
//! - Canonical request, response and error formatting for both versions
//! - Message classification by shape (request, notification, response, error, batch)
//! - A call ledger with per-call and per-batch timeouts that settles exactly once
//! - Connect/retry bookkeeping over a pluggable [`Transport`]

pub mod classify;
pub mod config;
pub mod error;
pub mod format;
pub mod framer;
pub mod ledger;
pub mod lifecycle;
pub mod prelude;
pub mod subscribe;
pub mod transport;
pub mod types;

// Re-export main types
pub use classify::{BatchMessage, Classified, Role, classify, parse_message};
pub use config::{BackoffConfig, ProtocolConfig};
pub use error::{
    ClassifyError, ConfigError, ErrorCode, ErrorObject, FormatError, LedgerError, RpcError,
    TransportError,
};
pub use format::{
    ErrorFields, RequestFields, ResponseFields, format_batch, format_error, format_request,
    format_response, format_rpc_error,
};
pub use framer::MessageBuffer;
pub use ledger::{
    BatchFailure, BatchHandle, BatchKey, BatchOutcome, CallHandle, CallLedger, CallOutcome,
};
pub use lifecycle::{ConnectAttempt, ConnectionLifecycle, ConnectionState};
pub use subscribe::{Notification, NotificationHandler, SubscriptionId, SubscriptionRegistry};
pub use transport::{
    BoxedTransport, Delivery, EventReceiver, EventSender, Transport, TransportEvent,
    TransportType,
};
pub use types::{JsonRpcVersion, RequestId};

/// JSON-RPC 2.0 version constant
pub const JSONRPC_VERSION: &str = "2.0";

/// Delimiter used when none is configured
pub const DEFAULT_DELIMITER: &str = "\n";

/// Error codes on the wire
pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;

    // Implementation-defined server errors
    pub const TIMEOUT: i64 = -32000;
    pub const UNKNOWN: i64 = -32001;
}
