//! Canonical JSON-RPC message text.
//!
//! Each formatter validates the shape it is asked to produce and returns
//! the serialized message with the delimiter appended. Member order is
//! fixed so peers and tests see byte-identical output.

use serde_json::{Map, Value};

use crate::error::{ErrorObject, FormatError, RpcError};
use crate::types::{JsonRpcVersion, RequestId};

/// Inputs for [`format_request`]. `method` is a JSON value because requests
/// are often assembled from dynamic input; anything but a string is refused.
#[derive(Debug, Clone, Copy)]
pub struct RequestFields<'a> {
    pub method: &'a Value,
    pub params: Option<&'a Value>,
    pub id: Option<&'a RequestId>,
    pub version: JsonRpcVersion,
    pub delimiter: &'a str,
}

/// Inputs for [`format_response`]. A response with `method` and `params`
/// and no id is how servers push notifications.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseFields<'a> {
    pub jsonrpc: Option<JsonRpcVersion>,
    pub id: Option<&'a RequestId>,
    pub method: Option<&'a Value>,
    pub result: Option<&'a Value>,
    pub params: Option<&'a Value>,
    pub delimiter: &'a str,
}

/// Inputs for [`format_error`]. `jsonrpc` other than 2.0 (or absent)
/// produces the 1.0 shape.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorFields<'a> {
    pub jsonrpc: Option<JsonRpcVersion>,
    pub id: Option<&'a RequestId>,
    pub code: i64,
    pub message: &'a str,
    pub data: Option<&'a Value>,
    pub delimiter: &'a str,
}

/// `null` params are treated as absent.
fn present(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| !v.is_null())
}

fn check_params(params: &Value) -> Result<(), FormatError> {
    if params.is_array() || params.is_object() {
        Ok(())
    } else {
        Err(FormatError::Type(format!(
            "{} must be an object or array",
            params
        )))
    }
}

fn finish(message: Map<String, Value>, delimiter: &str) -> Result<String, FormatError> {
    let mut text = serde_json::to_string(&Value::Object(message))?;
    text.push_str(delimiter);
    Ok(text)
}

/// Format a request, or a notification when `id` is `None`.
///
/// ```
/// use serde_json::json;
/// use wirerpc_core::{format_request, JsonRpcVersion, RequestFields, RequestId};
///
/// let text = format_request(&RequestFields {
///     method: &json!("add"),
///     params: Some(&json!([1, 2])),
///     id: Some(&RequestId::Number(1)),
///     version: JsonRpcVersion::V2,
///     delimiter: "\n",
/// })
/// .unwrap();
/// assert_eq!(text, "{\"method\":\"add\",\"jsonrpc\":\"2.0\",\"params\":[1,2],\"id\":1}\n");
/// ```
pub fn format_request(fields: &RequestFields<'_>) -> Result<String, FormatError> {
    let method = fields
        .method
        .as_str()
        .ok_or_else(|| FormatError::Type(format!("{} must be a string", fields.method)))?;

    let mut request = Map::new();
    request.insert("method".to_string(), Value::String(method.to_string()));

    if fields.version.is_v2() {
        request.insert("jsonrpc".to_string(), Value::String("2.0".to_string()));
    }

    if let Some(params) = present(fields.params) {
        check_params(params)?;
        request.insert("params".to_string(), params.clone());
    }

    if let Some(id) = fields.id {
        request.insert("id".to_string(), id.to_value());
    }

    finish(request, fields.delimiter)
}

/// Format a success response (or a server-pushed notification).
pub fn format_response(fields: &ResponseFields<'_>) -> Result<String, FormatError> {
    let params = present(fields.params);
    let method = present(fields.method);

    if params.is_some() && fields.result.is_some() {
        return Err(FormatError::InvalidShape(
            "Cannot send response with both params and result".to_string(),
        ));
    }

    if method.is_some() && fields.id.is_some() {
        return Err(FormatError::InvalidShape(
            "Cannot send response with both a method and non-null id".to_string(),
        ));
    }

    if let Some(method) = method
        && !method.is_string()
    {
        return Err(FormatError::Type("Method must be a string".to_string()));
    }

    if let Some(params) = params {
        check_params(params)?;
    }

    let mut response = Map::new();

    if let Some(result) = fields.result {
        response.insert("result".to_string(), result.clone());
    }

    if let Some(params) = params {
        response.insert("params".to_string(), params.clone());
    }

    let v2 = fields.jsonrpc.is_some_and(|v| v.is_v2());
    if v2 {
        response.insert("jsonrpc".to_string(), Value::String("2.0".to_string()));
    } else {
        response.insert("error".to_string(), Value::Null);
    }

    if let Some(method) = method {
        response.insert("method".to_string(), method.clone());
    }

    match fields.id {
        Some(id) => {
            response.insert("id".to_string(), id.to_value());
        }
        None if !v2 => {
            response.insert("id".to_string(), Value::Null);
        }
        None => {}
    }

    finish(response, fields.delimiter)
}

/// Format an error response.
pub fn format_error(fields: &ErrorFields<'_>) -> Result<String, FormatError> {
    if fields.message.is_empty() {
        return Err(FormatError::MissingMessage);
    }

    let error = RpcError::new(
        fields.jsonrpc.unwrap_or(JsonRpcVersion::V1),
        fields.id.cloned(),
        ErrorObject {
            code: fields.code,
            message: fields.message.to_string(),
            data: fields.data.cloned(),
        },
    );

    let mut text = serde_json::to_string(&error.to_value())?;
    text.push_str(fields.delimiter);
    Ok(text)
}

/// Serialize an already-built error reply with the delimiter appended.
pub fn format_rpc_error(error: &RpcError, delimiter: &str) -> Result<String, FormatError> {
    format_error(&ErrorFields {
        jsonrpc: Some(error.version),
        id: error.id.as_ref(),
        code: error.error.code,
        message: &error.error.message,
        data: error.error.data.as_ref(),
        delimiter,
    })
}

/// Join pre-formatted messages into one batch array. Each member must be a
/// JSON object; trailing delimiters on the members are ignored. Returns the
/// parsed members alongside the batch text.
pub fn format_batch(
    members: &[String],
    delimiter: &str,
) -> Result<(Vec<Value>, String), FormatError> {
    let mut batch = Vec::with_capacity(members.len());
    for member in members {
        let trimmed = member.strip_suffix(delimiter).unwrap_or(member);
        let value: Value = serde_json::from_str(trimmed)
            .map_err(|e| FormatError::InvalidBatchMember(format!("{}: {}", trimmed, e)))?;
        if !value.is_object() {
            return Err(FormatError::InvalidBatchMember(trimmed.to_string()));
        }
        batch.push(value);
    }
    let mut text = serde_json::to_string(&batch)?;
    text.push_str(delimiter);
    Ok((batch, text))
}
