//! Method handlers

use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use thiserror::Error;

use wirerpc_core::{ErrorCode, ErrorObject};

/// What a handler can fail with. Every variant maps onto a JSON-RPC error
/// object sent back to the caller.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum HandlerError {
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Internal error: {0}")]
    Internal(String),

    /// A fully specified error object (custom code, message and data)
    #[error("JSON-RPC error {}: {}", .0.code, .0.message)]
    Rpc(ErrorObject),
}

impl HandlerError {
    pub fn custom(code: i64, message: impl Into<String>, data: Option<Value>) -> Self {
        HandlerError::Rpc(ErrorObject {
            code,
            message: message.into(),
            data,
        })
    }

    /// Convert this error to a JSON-RPC error object
    pub fn to_error_object(&self) -> ErrorObject {
        match self {
            HandlerError::InvalidParams(message) => ErrorObject::new(
                ErrorCode::InvalidParams,
                None,
                Some(Value::String(message.clone())),
            ),
            HandlerError::Internal(message) => ErrorObject::internal_error(Some(message.clone())),
            HandlerError::Rpc(error) => error.clone(),
        }
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        HandlerError::InvalidParams(err.to_string())
    }
}

/// Trait for handling JSON-RPC method calls
#[async_trait]
pub trait JsonRpcHandler: Send + Sync {
    /// Handle a request; the returned value becomes `result`
    async fn handle(&self, method: &str, params: Option<Value>) -> Result<Value, HandlerError>;

    /// Handle a notification (optional - default does nothing)
    async fn handle_notification(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<(), HandlerError> {
        let _ = (method, params);
        Ok(())
    }

    /// List supported methods (optional - used for introspection)
    fn supported_methods(&self) -> Vec<String> {
        vec![]
    }
}

/// A handler backed by an async closure over the params
pub struct FnHandler<F> {
    handler_fn: F,
}

impl<F, Fut> FnHandler<F>
where
    F: Fn(Option<Value>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, HandlerError>> + Send,
{
    pub fn new(handler_fn: F) -> Self {
        Self { handler_fn }
    }
}

#[async_trait]
impl<F, Fut> JsonRpcHandler for FnHandler<F>
where
    F: Fn(Option<Value>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, HandlerError>> + Send,
{
    async fn handle(&self, _method: &str, params: Option<Value>) -> Result<Value, HandlerError> {
        (self.handler_fn)(params).await
    }
}

/// Deserialize positional or named params into `T`, as `InvalidParams` on
/// mismatch. Absent params deserialize from `null`.
pub fn parse_params<T>(params: Option<Value>) -> Result<T, HandlerError>
where
    T: serde::de::DeserializeOwned,
{
    Ok(serde_json::from_value(params.unwrap_or(Value::Null))?)
}
