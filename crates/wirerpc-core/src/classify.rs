//! Inbound message classification.
//!
//! The kind of a message is never read off the wire; it is derived from the
//! members present, in a fixed precedence so that a message is exactly one
//! kind.

use std::collections::BTreeSet;

use serde_json::Value;

use crate::error::{ClassifyError, RpcError};
use crate::types::{JsonRpcVersion, RequestId};

/// Which side of the conversation is reading the message. A message with
/// both `method` and `id` is a request to a server and a protocol violation
/// to a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// An inbound batch, split for routing.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchMessage {
    /// Every member, in arrival order.
    pub members: Vec<Value>,
    /// Members shaped as notifications, emitted one by one.
    pub notifications: Vec<Value>,
    /// Usable ids carried by the members, used for batch correlation.
    pub ids: BTreeSet<RequestId>,
}

impl BatchMessage {
    fn from_members(members: Vec<Value>) -> Self {
        let mut notifications = Vec::new();
        let mut ids = BTreeSet::new();
        for member in &members {
            if is_notification(member) {
                notifications.push(member.clone());
            } else if let Some(id) = member.get("id").and_then(RequestId::from_value) {
                ids.insert(id);
            }
        }
        Self {
            members,
            notifications,
            ids,
        }
    }
}

/// The derived kind of an inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Classified {
    Batch(BatchMessage),
    Notification {
        method: String,
        params: Option<Value>,
        message: Value,
    },
    Error {
        id: Option<RequestId>,
        error: RpcError,
        message: Value,
    },
    Response {
        id: Option<RequestId>,
        message: Value,
    },
    Request {
        id: RequestId,
        method: String,
        params: Option<Value>,
        message: Value,
    },
}

impl Classified {
    pub fn kind(&self) -> &'static str {
        match self {
            Classified::Batch(_) => "batch",
            Classified::Notification { .. } => "notification",
            Classified::Error { .. } => "error",
            Classified::Response { .. } => "response",
            Classified::Request { .. } => "request",
        }
    }
}

fn has_null_or_missing_id(message: &Value) -> bool {
    message.get("id").is_none_or(Value::is_null)
}

fn is_notification(message: &Value) -> bool {
    message.is_object()
        && has_null_or_missing_id(message)
        && message.get("method").is_some_and(Value::is_string)
}

fn params_of(message: &Value) -> Option<Value> {
    message.get("params").filter(|p| !p.is_null()).cloned()
}

/// Classify one parsed JSON value.
pub fn classify(value: Value, role: Role) -> Result<Classified, ClassifyError> {
    let value = match value {
        Value::Array(members) => return Ok(Classified::Batch(BatchMessage::from_members(members))),
        Value::Object(_) => value,
        other => {
            return Err(ClassifyError::Parse {
                raw: other.to_string(),
            });
        }
    };

    let method = value.get("method").and_then(Value::as_str).map(str::to_string);

    if value.get("id").is_none() || (value["id"].is_null() && method.is_some()) {
        return match method {
            Some(method) => Ok(Classified::Notification {
                method,
                params: params_of(&value),
                message: value,
            }),
            None => Err(ClassifyError::InvalidRequest(
                "message has neither an id nor a method".to_string(),
            )),
        };
    }

    let id = value.get("id").and_then(RequestId::from_value);

    if value.get("error").is_some_and(|e| !e.is_null()) {
        let error = RpcError::from_message(JsonRpcVersion::from_message(&value), &value);
        return Ok(Classified::Error {
            id,
            error,
            message: value,
        });
    }

    if value.get("method").is_none() {
        return Ok(Classified::Response { id, message: value });
    }

    match role {
        Role::Client => Err(ClassifyError::Unknown {
            method: method.unwrap_or_else(|| value["method"].to_string()),
        }),
        Role::Server => {
            let method = method.ok_or_else(|| {
                ClassifyError::InvalidRequest("method must be a string".to_string())
            })?;
            let id = id.ok_or_else(|| {
                ClassifyError::InvalidRequest(format!("unusable request id {}", value["id"]))
            })?;
            Ok(Classified::Request {
                id,
                method,
                params: params_of(&value),
                message: value,
            })
        }
    }
}

/// Parse raw message text and classify it. Text that is not JSON is a parse
/// error carrying the raw text.
pub fn parse_message(raw: &str, role: Role) -> Result<Classified, ClassifyError> {
    let value: Value = serde_json::from_str(raw).map_err(|_| ClassifyError::Parse {
        raw: raw.to_string(),
    })?;
    classify(value, role)
}
