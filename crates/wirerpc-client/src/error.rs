//! Error types for client operations

use serde_json::Value;
use thiserror::Error;
use wirerpc_core::{
    BatchFailure, ConfigError, FormatError, LedgerError, RpcError, TransportError,
};

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;

/// Everything a client call can fail with
#[derive(Error, Debug)]
pub enum ClientError {
    /// The peer answered with an error, the call timed out, or the
    /// connection closed before an answer arrived
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// A batch reply contained at least one error; holds every member
    #[error("Batch rejected: {} response(s)", .0.len())]
    BatchRejected(Vec<Value>),

    /// Transport-level errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The message could not be formatted
    #[error("Format error: {0}")]
    Format(#[from] FormatError),

    /// The id is already awaiting a reply
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Client is not connected")]
    NotConnected,

    /// JSON parsing errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<BatchFailure> for ClientError {
    fn from(failure: BatchFailure) -> Self {
        match failure {
            BatchFailure::Rejected(members) => ClientError::BatchRejected(members),
            BatchFailure::Failed(error) => ClientError::Rpc(error),
        }
    }
}

impl ClientError {
    /// The structured error reply, if this failure carries one
    pub fn rpc_error(&self) -> Option<&RpcError> {
        match self {
            ClientError::Rpc(error) => Some(error),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.rpc_error().is_some_and(RpcError::is_timeout)
    }

    /// Check if the operation is worth retrying on a fresh connection
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Transport(e) => e.is_retryable(),
            ClientError::NotConnected => true,
            _ => false,
        }
    }
}
