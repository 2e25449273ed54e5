use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

use crate::types::{JsonRpcVersion, RequestId};

/// JSON-RPC error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    Timeout,
    Unknown,
    Other(i64),
}

impl ErrorCode {
    pub fn code(&self) -> i64 {
        match self {
            ErrorCode::ParseError => crate::error_codes::PARSE_ERROR,
            ErrorCode::InvalidRequest => crate::error_codes::INVALID_REQUEST,
            ErrorCode::MethodNotFound => crate::error_codes::METHOD_NOT_FOUND,
            ErrorCode::InvalidParams => crate::error_codes::INVALID_PARAMS,
            ErrorCode::InternalError => crate::error_codes::INTERNAL_ERROR,
            ErrorCode::Timeout => crate::error_codes::TIMEOUT,
            ErrorCode::Unknown => crate::error_codes::UNKNOWN,
            ErrorCode::Other(code) => *code,
        }
    }

    pub fn from_code(code: i64) -> Self {
        match code {
            crate::error_codes::PARSE_ERROR => ErrorCode::ParseError,
            crate::error_codes::INVALID_REQUEST => ErrorCode::InvalidRequest,
            crate::error_codes::METHOD_NOT_FOUND => ErrorCode::MethodNotFound,
            crate::error_codes::INVALID_PARAMS => ErrorCode::InvalidParams,
            crate::error_codes::INTERNAL_ERROR => ErrorCode::InternalError,
            crate::error_codes::TIMEOUT => ErrorCode::Timeout,
            crate::error_codes::UNKNOWN => ErrorCode::Unknown,
            other => ErrorCode::Other(other),
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            ErrorCode::ParseError => "Parse Error",
            ErrorCode::InvalidRequest => "Invalid Request",
            ErrorCode::MethodNotFound => "Method not found",
            ErrorCode::InvalidParams => "Invalid Parameters",
            ErrorCode::InternalError => "Internal Error",
            ErrorCode::Timeout => "Request Timeout",
            ErrorCode::Unknown | ErrorCode::Other(_) => "Unknown Error",
        }
    }

    /// HTTP status used when this error is the whole body of an HTTP reply.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCode::ParseError => 500,
            ErrorCode::InvalidRequest => 400,
            ErrorCode::MethodNotFound => 404,
            ErrorCode::InvalidParams => 500,
            ErrorCode::InternalError => 500,
            ErrorCode::Timeout => 408,
            ErrorCode::Unknown | ErrorCode::Other(_) => 500,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code(), self.message())
    }
}

/// JSON-RPC Error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    pub fn new(code: ErrorCode, message: Option<String>, data: Option<Value>) -> Self {
        Self {
            code: code.code(),
            message: message.unwrap_or_else(|| code.message().to_string()),
            data,
        }
    }

    pub fn parse_error(data: Option<Value>) -> Self {
        Self::new(ErrorCode::ParseError, None, data)
    }

    pub fn invalid_request(data: Option<Value>) -> Self {
        Self::new(ErrorCode::InvalidRequest, None, data)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            ErrorCode::MethodNotFound,
            None,
            Some(Value::String(method.to_string())),
        )
    }

    pub fn invalid_params(message: &str) -> Self {
        Self::new(ErrorCode::InvalidParams, Some(message.to_string()), None)
    }

    pub fn internal_error(message: Option<String>) -> Self {
        Self::new(ErrorCode::InternalError, message, None)
    }

    pub fn timeout() -> Self {
        Self::new(ErrorCode::Timeout, None, None)
    }

    pub fn kind(&self) -> ErrorCode {
        ErrorCode::from_code(self.code)
    }

    /// Read the `error` member of an inbound message. Peers that send a bare
    /// string or a malformed object still produce a usable error.
    pub fn from_wire(error: &Value) -> Self {
        match error {
            Value::Object(map) => {
                let kind = map
                    .get("code")
                    .and_then(Value::as_i64)
                    .map(ErrorCode::from_code)
                    .unwrap_or(ErrorCode::Unknown);
                let message = map
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                Self::new(kind, message, map.get("data").cloned())
            }
            Value::String(message) => Self::new(ErrorCode::Unknown, Some(message.clone()), None),
            other => Self::new(ErrorCode::Unknown, None, Some(other.clone())),
        }
    }

    pub(crate) fn to_value(&self) -> Value {
        let mut error = Map::new();
        error.insert("code".to_string(), Value::from(self.code));
        error.insert("message".to_string(), Value::String(self.message.clone()));
        if let Some(data) = &self.data {
            error.insert("data".to_string(), data.clone());
        }
        Value::Object(error)
    }
}

/// A JSON-RPC error reply as the caller receives it.
///
/// Serializes to the exact wire shape of its version:
/// `{"jsonrpc":"2.0","error":{..},"id":..}` or
/// `{"result":null,"error":{..},"id":..}`.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcError {
    pub version: JsonRpcVersion,
    pub id: Option<RequestId>,
    pub error: ErrorObject,
}

impl RpcError {
    pub fn new(version: JsonRpcVersion, id: Option<RequestId>, error: ErrorObject) -> Self {
        Self { version, id, error }
    }

    pub fn timeout(version: JsonRpcVersion, id: Option<RequestId>) -> Self {
        Self::new(version, id, ErrorObject::timeout())
    }

    pub fn connection_closed(version: JsonRpcVersion, id: Option<RequestId>) -> Self {
        Self::new(
            version,
            id,
            ErrorObject::new(ErrorCode::Timeout, Some("Connection closed".to_string()), None),
        )
    }

    pub fn parse_error(version: JsonRpcVersion, raw: &str) -> Self {
        Self::new(
            version,
            None,
            ErrorObject::new(
                ErrorCode::ParseError,
                Some(format!("Unable to parse message: '{}'", raw)),
                None,
            ),
        )
    }

    pub fn unknown(version: JsonRpcVersion, id: Option<RequestId>, message: Option<String>) -> Self {
        Self::new(version, id, ErrorObject::new(ErrorCode::Unknown, message, None))
    }

    /// Build from an inbound error message. The id is taken from the
    /// message; `null` or unusable ids become `None`.
    pub fn from_message(version: JsonRpcVersion, message: &Value) -> Self {
        let id = message.get("id").and_then(RequestId::from_value);
        let error = message
            .get("error")
            .map(ErrorObject::from_wire)
            .unwrap_or_else(|| ErrorObject::new(ErrorCode::Unknown, None, None));
        Self::new(version, id, error)
    }

    pub fn code(&self) -> i64 {
        self.error.code
    }

    pub fn kind(&self) -> ErrorCode {
        self.error.kind()
    }

    pub fn is_timeout(&self) -> bool {
        self.error.code == crate::error_codes::TIMEOUT
    }

    pub fn to_value(&self) -> Value {
        let id = self.id.as_ref().map(RequestId::to_value).unwrap_or(Value::Null);
        let mut response = Map::new();
        if self.version.is_v2() {
            response.insert("jsonrpc".to_string(), Value::String("2.0".to_string()));
        } else {
            response.insert("result".to_string(), Value::Null);
        }
        response.insert("error".to_string(), self.error.to_value());
        response.insert("id".to_string(), id);
        Value::Object(response)
    }
}

impl Serialize for RpcError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_value().serialize(serializer)
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "JSON-RPC Error {}: {}",
            self.error.code, self.error.message
        )
    }
}

impl std::error::Error for RpcError {}

/// Contract violations of the message formatters.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("Type error: {0}")]
    Type(String),

    #[error("Invalid message shape: {0}")]
    InvalidShape(String),

    #[error("Must include message in error response")]
    MissingMessage,

    #[error("Invalid batch member: {0}")]
    InvalidBatchMember(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FormatError {
    pub fn is_type_error(&self) -> bool {
        matches!(self, FormatError::Type(_))
    }
}

/// Inbound messages the classifier refuses.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ClassifyError {
    #[error("Unable to parse message: '{raw}'")]
    Parse { raw: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unexpected request received by a client: {method}")]
    Unknown { method: String },
}

impl ClassifyError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ClassifyError::Parse { .. } => ErrorCode::ParseError,
            ClassifyError::InvalidRequest(_) => ErrorCode::InvalidRequest,
            ClassifyError::Unknown { .. } => ErrorCode::Unknown,
        }
    }

    /// The error a caller would see for this classification failure. None
    /// of these carry a usable id.
    pub fn to_rpc_error(&self, version: JsonRpcVersion) -> RpcError {
        match self {
            ClassifyError::Parse { raw } => RpcError::parse_error(version, raw),
            ClassifyError::InvalidRequest(_) => {
                RpcError::new(version, None, ErrorObject::invalid_request(None))
            }
            ClassifyError::Unknown { .. } => RpcError::unknown(version, None, None),
        }
    }
}

/// Ledger registration failures.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LedgerError {
    #[error("Request id {0} is already pending")]
    DuplicateId(RequestId),

    #[error("Batch with ids {0} is already pending")]
    DuplicateBatch(String),
}

/// Transport-level errors (no JSON-RPC semantics)
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP transport error: {0}")]
    Http(String),

    #[error("WebSocket transport error: {0}")]
    WebSocket(String),

    #[error("Unsupported transport: {0}")]
    Unsupported(String),

    #[error("Already connected")]
    AlreadyConnected,

    #[error("Not connected")]
    NotConnected,

    #[error("Transport closed unexpectedly")]
    Closed,
}

impl TransportError {
    /// Map a connect-time I/O failure, singling out refusals.
    pub fn from_connect_error(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::ConnectionRefused {
            TransportError::ConnectionRefused(err.to_string())
        } else {
            TransportError::Io(err)
        }
    }

    /// Only a refused connection is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::ConnectionRefused(_) => true,
            TransportError::Io(e) => e.kind() == std::io::ErrorKind::ConnectionRefused,
            _ => false,
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Delimiter must not be empty")]
    EmptyDelimiter,

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_codes() {
        assert_eq!(ErrorCode::ParseError.code(), -32700);
        assert_eq!(ErrorCode::MethodNotFound.code(), -32601);
        assert_eq!(ErrorCode::Timeout.code(), -32000);
        assert_eq!(ErrorCode::Unknown.code(), -32001);
        assert_eq!(ErrorCode::from_code(-32602), ErrorCode::InvalidParams);
        assert_eq!(ErrorCode::from_code(-1), ErrorCode::Other(-1));
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(ErrorCode::ParseError.http_status(), 500);
        assert_eq!(ErrorCode::InvalidRequest.http_status(), 400);
        assert_eq!(ErrorCode::MethodNotFound.http_status(), 404);
        assert_eq!(ErrorCode::Timeout.http_status(), 408);
    }

    #[test]
    fn test_timeout_error_shape() {
        let error = RpcError::timeout(JsonRpcVersion::V2, Some(RequestId::Number(1)));
        assert_eq!(
            serde_json::to_value(&error).unwrap(),
            json!({"jsonrpc": "2.0", "error": {"code": -32000, "message": "Request Timeout"}, "id": 1})
        );

        let error = RpcError::timeout(JsonRpcVersion::V1, None);
        assert_eq!(
            serde_json::to_string(&error).unwrap(),
            r#"{"result":null,"error":{"code":-32000,"message":"Request Timeout"},"id":null}"#
        );
    }

    #[test]
    fn test_error_from_message() {
        let message = json!({
            "jsonrpc": "2.0",
            "error": {"code": -32601, "message": "Method not found", "data": "foo"},
            "id": 3
        });
        let error = RpcError::from_message(JsonRpcVersion::V2, &message);
        assert_eq!(error.id, Some(RequestId::Number(3)));
        assert_eq!(error.kind(), ErrorCode::MethodNotFound);
        assert_eq!(error.error.data, Some(json!("foo")));
    }

    #[test]
    fn test_error_from_bare_string() {
        let error = ErrorObject::from_wire(&json!("boom"));
        assert_eq!(error.code, -32001);
        assert_eq!(error.message, "boom");
    }

    #[test]
    fn test_retryable_transport_errors() {
        let refused = std::io::Error::from(std::io::ErrorKind::ConnectionRefused);
        assert!(TransportError::from_connect_error(refused).is_retryable());
        let reset = std::io::Error::from(std::io::ErrorKind::ConnectionReset);
        assert!(!TransportError::from_connect_error(reset).is_retryable());
        assert!(!TransportError::Closed.is_retryable());
    }
}
