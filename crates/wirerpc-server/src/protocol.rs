//! Inbound message handling for one server.
//!
//! [`ServerProtocol`] takes one framed message, classifies it from the
//! server's point of view and produces the reply text (if any). Transports
//! only move bytes; everything JSON-RPC happens here.

use std::sync::Arc;

use futures::future::join_all;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, error, trace};

use wirerpc_core::{
    Classified, ClassifyError, ErrorCode, ErrorFields, ErrorObject, JsonRpcVersion, Notification,
    ProtocolConfig, RequestId, ResponseFields, Role, SubscriptionId, SubscriptionRegistry,
    classify, format_error, format_response, parse_message,
};

use crate::dispatcher::MethodRegistry;
use crate::registry::ServerEvent;

/// One reply produced for an inbound message
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// Reply text, delimiter included
    pub text: String,
    /// Set when the reply is a single error response
    pub error: Option<ErrorCode>,
}

impl Reply {
    /// Status for an HTTP reply carrying this text
    pub fn http_status(&self) -> u16 {
        self.error.map(|code| code.http_status()).unwrap_or(200)
    }
}

/// Reply body before delimiting, so batch members can be joined
struct Part {
    text: String,
    error: Option<ErrorCode>,
}

pub struct ServerProtocol {
    methods: MethodRegistry,
    subscriptions: Arc<SubscriptionRegistry>,
    events: Option<broadcast::Sender<ServerEvent>>,
    version: JsonRpcVersion,
    delimiter: String,
}

impl std::fmt::Debug for ServerProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerProtocol")
            .field("methods", &self.methods)
            .field("version", &self.version)
            .field("delimiter", &self.delimiter)
            .finish()
    }
}

impl ServerProtocol {
    pub fn new(methods: MethodRegistry, config: &ProtocolConfig) -> Self {
        Self {
            methods,
            subscriptions: Arc::new(SubscriptionRegistry::new()),
            events: None,
            version: config.version,
            delimiter: config.delimiter.clone(),
        }
    }

    /// Publish inbound notifications as [`ServerEvent::Notification`]
    pub fn with_events(mut self, events: broadcast::Sender<ServerEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn version(&self) -> JsonRpcVersion {
        self.version
    }

    pub fn delimiter(&self) -> &str {
        &self.delimiter
    }

    pub fn methods(&self) -> &MethodRegistry {
        &self.methods
    }

    /// Call `handler` for every notification a client sends with `method`
    pub fn subscribe<F>(&self, method: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: Fn(Notification) + Send + Sync + 'static,
    {
        self.subscriptions.subscribe(method, handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscriptions.unsubscribe(id)
    }

    /// Server-pushed notification text in the configured version
    pub fn format_notification(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<String, wirerpc_core::FormatError> {
        let method = Value::String(method.to_string());
        format_response(&ResponseFields {
            jsonrpc: Some(self.version),
            method: Some(&method),
            params: params.as_ref(),
            delimiter: &self.delimiter,
            ..Default::default()
        })
    }

    /// Handle one framed message. Notifications and empty messages produce
    /// no reply.
    pub async fn handle_message(&self, raw: &str) -> Option<Reply> {
        if raw.trim().is_empty() {
            return None;
        }
        trace!(message = %raw, "Inbound message");

        let part = match parse_message(raw, Role::Server) {
            Ok(Classified::Batch(batch)) => self.handle_batch(batch.members).await?,
            Ok(classified) => self.handle_classified(classified).await?,
            Err(err) => self.classify_failure(&err)?,
        };

        Some(Reply {
            text: part.text + &self.delimiter,
            error: part.error,
        })
    }

    async fn handle_batch(&self, members: Vec<Value>) -> Option<Part> {
        if members.is_empty() {
            return self.error_part(None, ErrorObject::invalid_request(None));
        }

        let replies = join_all(members.into_iter().map(|member| async move {
            match classify(member, Role::Server) {
                Ok(classified) => self.handle_classified(classified).await,
                Err(err) => self.classify_failure(&err),
            }
        }))
        .await;

        let parts: Vec<String> = replies.into_iter().flatten().map(|part| part.text).collect();
        if parts.is_empty() {
            return None;
        }
        Some(Part {
            text: format!("[{}]", parts.join(",")),
            error: None,
        })
    }

    async fn handle_classified(&self, classified: Classified) -> Option<Part> {
        match classified {
            Classified::Request {
                id, method, params, ..
            } => {
                debug!(method = %method, id = %id, "Request");
                match self.methods.call(&method, params).await {
                    Ok(result) => self.result_part(&id, &result),
                    Err(err) => self.error_part(Some(&id), err),
                }
            }
            Classified::Notification {
                method,
                params,
                message,
            } => {
                debug!(method = %method, "Notification");
                let notification = Notification {
                    method: method.clone(),
                    params: params.clone(),
                    message,
                };
                if let Some(events) = &self.events {
                    let _ = events.send(ServerEvent::Notification(notification.clone()));
                }
                self.subscriptions.dispatch(notification);
                self.methods.notify(&method, params).await;
                None
            }
            Classified::Response { id, .. } | Classified::Error { id, .. } => {
                debug!(id = ?id, "Response sent to a server");
                self.error_part(id.as_ref(), ErrorObject::invalid_request(None))
            }
            // Top-level batches never get here; nested ones are not requests
            Classified::Batch(_) => self.error_part(None, ErrorObject::invalid_request(None)),
        }
    }

    fn classify_failure(&self, err: &ClassifyError) -> Option<Part> {
        debug!(error = %err, "Unusable message");
        let error = match err {
            ClassifyError::Parse { .. } => ErrorObject::parse_error(None),
            ClassifyError::InvalidRequest(_) | ClassifyError::Unknown { .. } => {
                ErrorObject::invalid_request(None)
            }
        };
        self.error_part(None, error)
    }

    fn result_part(&self, id: &RequestId, result: &Value) -> Option<Part> {
        let formatted = format_response(&ResponseFields {
            jsonrpc: Some(self.version),
            id: Some(id),
            result: Some(result),
            ..Default::default()
        });
        match formatted {
            Ok(text) => Some(Part { text, error: None }),
            Err(err) => {
                error!(id = %id, error = %err, "Unable to format response");
                self.error_part(Some(id), ErrorObject::internal_error(None))
            }
        }
    }

    fn error_part(&self, id: Option<&RequestId>, error: ErrorObject) -> Option<Part> {
        let kind = error.kind();
        let formatted = format_error(&ErrorFields {
            jsonrpc: Some(self.version),
            id,
            code: error.code,
            message: &error.message,
            data: error.data.as_ref(),
            ..Default::default()
        });
        match formatted {
            Ok(text) => Some(Part {
                text,
                error: Some(kind),
            }),
            Err(err) => {
                error!(error = %err, "Unable to format error response");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{HandlerError, parse_params};
    use serde_json::json;

    fn protocol(version: JsonRpcVersion) -> ServerProtocol {
        let methods = MethodRegistry::new()
            .with_fn("add", |params| async move {
                let (a, b): (i64, i64) = parse_params(params)?;
                Ok(json!(a + b))
            })
            .with_fn("fail", |_| async move {
                Err(HandlerError::custom(-32050, "Nope", Some(json!([1]))))
            });
        ServerProtocol::new(methods, &ProtocolConfig::default().with_version(version))
    }

    #[tokio::test]
    async fn test_request_reply() {
        let protocol = protocol(JsonRpcVersion::V2);
        let reply = protocol
            .handle_message(r#"{"jsonrpc":"2.0","method":"add","params":[1,2],"id":7}"#)
            .await
            .unwrap();
        assert_eq!(reply.text, "{\"result\":3,\"jsonrpc\":\"2.0\",\"id\":7}\n");
        assert_eq!(reply.http_status(), 200);
    }

    #[tokio::test]
    async fn test_version_one_reply() {
        let protocol = protocol(JsonRpcVersion::V1);
        let reply = protocol
            .handle_message(r#"{"method":"add","params":[2,2],"id":"x"}"#)
            .await
            .unwrap();
        assert_eq!(reply.text, "{\"result\":4,\"error\":null,\"id\":\"x\"}\n");
    }

    #[tokio::test]
    async fn test_error_replies() {
        let protocol = protocol(JsonRpcVersion::V2);

        let reply = protocol
            .handle_message(r#"{"jsonrpc":"2.0","method":"missing","id":1}"#)
            .await
            .unwrap();
        assert_eq!(reply.error, Some(ErrorCode::MethodNotFound));
        assert_eq!(reply.http_status(), 404);
        let value: Value = serde_json::from_str(&reply.text).unwrap();
        assert_eq!(value["error"]["data"], "missing");

        let reply = protocol
            .handle_message(r#"{"jsonrpc":"2.0","method":"fail","id":2}"#)
            .await
            .unwrap();
        assert_eq!(
            reply.text,
            "{\"jsonrpc\":\"2.0\",\"error\":{\"code\":-32050,\"message\":\"Nope\",\"data\":[1]},\"id\":2}\n"
        );

        let reply = protocol.handle_message("{nope").await.unwrap();
        assert_eq!(
            reply.text,
            "{\"jsonrpc\":\"2.0\",\"error\":{\"code\":-32700,\"message\":\"Parse Error\"},\"id\":null}\n"
        );
        assert_eq!(reply.http_status(), 500);

        let reply = protocol
            .handle_message(r#"{"jsonrpc":"2.0","result":1,"id":3}"#)
            .await
            .unwrap();
        assert_eq!(reply.error, Some(ErrorCode::InvalidRequest));
        assert!(reply.text.ends_with("\"id\":3}\n"));
    }

    #[tokio::test]
    async fn test_notification_has_no_reply() {
        let (events, mut receiver) = broadcast::channel(8);
        let protocol = protocol(JsonRpcVersion::V2).with_events(events);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        protocol.subscribe("log", move |n| {
            let _ = tx.send(n.params);
        });

        assert!(
            protocol
                .handle_message(r#"{"jsonrpc":"2.0","method":"log","params":["hi"]}"#)
                .await
                .is_none()
        );
        assert_eq!(rx.try_recv().unwrap(), Some(json!(["hi"])));
        assert!(matches!(
            receiver.try_recv(),
            Ok(ServerEvent::Notification(n)) if n.method == "log"
        ));
        assert!(protocol.handle_message("  ").await.is_none());
    }

    #[tokio::test]
    async fn test_batch_replies() {
        let protocol = protocol(JsonRpcVersion::V2);
        let reply = protocol
            .handle_message(
                r#"[{"jsonrpc":"2.0","method":"add","params":[1,1],"id":1},
                    {"jsonrpc":"2.0","method":"log"},
                    {"jsonrpc":"2.0","method":"missing","id":2},
                    7]"#,
            )
            .await
            .unwrap();
        assert_eq!(reply.error, None);

        let replies: Vec<Value> = serde_json::from_str(&reply.text).unwrap();
        assert_eq!(replies.len(), 3);
        assert_eq!(replies[0], json!({"result": 2, "jsonrpc": "2.0", "id": 1}));
        assert_eq!(replies[1]["error"]["code"], -32601);
        assert_eq!(replies[2]["error"]["code"], -32700);

        let reply = protocol.handle_message("[]").await.unwrap();
        assert_eq!(reply.error, Some(ErrorCode::InvalidRequest));

        assert!(
            protocol
                .handle_message(r#"[{"jsonrpc":"2.0","method":"log"}]"#)
                .await
                .is_none()
        );
    }

    #[test]
    fn test_format_notification() {
        let protocol = protocol(JsonRpcVersion::V2);
        assert_eq!(
            protocol.format_notification("tick", Some(json!([1]))).unwrap(),
            "{\"params\":[1],\"jsonrpc\":\"2.0\",\"method\":\"tick\"}\n"
        );
    }
}
