use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A uniquely identifying ID for a JSON-RPC request.
/// Can be a string or a number, but never null.
///
/// Ids are totally ordered (numbers before strings) so that a set of ids has
/// one canonical form, which is what batch correlation keys on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::String(s) => write!(f, "{}", s),
            RequestId::Number(n) => write!(f, "{}", n),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        RequestId::Number(n)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::String(s.to_string())
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        RequestId::String(s)
    }
}

impl From<RequestId> for Value {
    fn from(id: RequestId) -> Self {
        match id {
            RequestId::Number(n) => Value::from(n),
            RequestId::String(s) => Value::String(s),
        }
    }
}

impl RequestId {
    /// Read an id off the wire. `null`, floats, booleans and containers are
    /// not usable ids and yield `None`.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(RequestId::Number),
            Value::String(s) => Some(RequestId::String(s.clone())),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            RequestId::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            RequestId::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        self.clone().into()
    }
}

/// JSON-RPC version spoken on a connection.
///
/// 1.0 messages carry no `jsonrpc` member and always include `error` in
/// responses; 2.0 messages are tagged `"jsonrpc": "2.0"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum JsonRpcVersion {
    V1,
    #[default]
    V2,
}

impl JsonRpcVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            JsonRpcVersion::V1 => "1.0",
            JsonRpcVersion::V2 => "2.0",
        }
    }

    pub fn is_v2(&self) -> bool {
        matches!(self, JsonRpcVersion::V2)
    }

    /// Interpret the `jsonrpc` member of an inbound message. Anything other
    /// than the string `"2.0"` is a 1.0 message.
    pub fn from_message(message: &Value) -> Self {
        match message.get("jsonrpc").and_then(Value::as_str) {
            Some("2.0") => JsonRpcVersion::V2,
            _ => JsonRpcVersion::V1,
        }
    }
}

impl fmt::Display for JsonRpcVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for JsonRpcVersion {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            JsonRpcVersion::V1 => serializer.serialize_u8(1),
            JsonRpcVersion::V2 => serializer.serialize_str("2.0"),
        }
    }
}

impl<'de> Deserialize<'de> for JsonRpcVersion {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        match &value {
            Value::Number(n) if n.as_f64() == Some(1.0) => Ok(JsonRpcVersion::V1),
            Value::Number(n) if n.as_f64() == Some(2.0) => Ok(JsonRpcVersion::V2),
            Value::String(s) if s == "1" || s == "1.0" => Ok(JsonRpcVersion::V1),
            Value::String(s) if s == "2" || s == "2.0" => Ok(JsonRpcVersion::V2),
            _ => Err(serde::de::Error::custom(format!(
                "Invalid JSON-RPC version: {}",
                value
            ))),
        }
    }
}
