//! Method routing

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use wirerpc_core::ErrorObject;

use crate::handler::{FnHandler, HandlerError, JsonRpcHandler};

/// Routes method names to their handlers
#[derive(Clone, Default)]
pub struct MethodRegistry {
    handlers: HashMap<String, Arc<dyn JsonRpcHandler>>,
    default_handler: Option<Arc<dyn JsonRpcHandler>>,
}

impl fmt::Debug for MethodRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodRegistry")
            .field("methods", &self.registered_methods())
            .field("default_handler", &self.default_handler.is_some())
            .finish()
    }
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a specific method
    pub fn register_method<H>(&mut self, method: impl Into<String>, handler: H)
    where
        H: JsonRpcHandler + 'static,
    {
        self.handlers.insert(method.into(), Arc::new(handler));
    }

    /// Register a handler for multiple methods
    pub fn register_methods<H>(&mut self, methods: Vec<String>, handler: H)
    where
        H: JsonRpcHandler + 'static,
    {
        let handler_arc: Arc<dyn JsonRpcHandler> = Arc::new(handler);
        for method in methods {
            self.handlers.insert(method, handler_arc.clone());
        }
    }

    /// Register an async closure over the params
    pub fn register_fn<F, Fut>(&mut self, method: impl Into<String>, handler_fn: F)
    where
        F: Fn(Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        self.register_method(method, FnHandler::new(handler_fn));
    }

    /// Builder form of [`register_fn`](Self::register_fn)
    pub fn with_fn<F, Fut>(mut self, method: impl Into<String>, handler_fn: F) -> Self
    where
        F: Fn(Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        self.register_fn(method, handler_fn);
        self
    }

    /// Set a default handler for unregistered methods
    pub fn set_default_handler<H>(&mut self, handler: H)
    where
        H: JsonRpcHandler + 'static,
    {
        self.default_handler = Some(Arc::new(handler));
    }

    pub fn has_method(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    /// Get all registered methods
    pub fn registered_methods(&self) -> Vec<String> {
        let mut methods: Vec<String> = self.handlers.keys().cloned().collect();
        methods.sort();
        methods
    }

    fn handler_for(&self, method: &str) -> Option<&Arc<dyn JsonRpcHandler>> {
        self.handlers.get(method).or(self.default_handler.as_ref())
    }

    /// Invoke the handler for `method`. Unregistered methods fail with
    /// `MethodNotFound` carrying the method name.
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, ErrorObject> {
        match self.handler_for(method) {
            Some(handler) => handler.handle(method, params).await.map_err(|err| {
                debug!(method = %method, error = %err, "Handler failed");
                err.to_error_object()
            }),
            None => {
                debug!(method = %method, "Method not found");
                Err(ErrorObject::method_not_found(method))
            }
        }
    }

    /// Deliver a notification. Unknown methods are ignored; handler failures
    /// are logged since there is nobody to reply to.
    pub async fn notify(&self, method: &str, params: Option<Value>) {
        if let Some(handler) = self.handler_for(method)
            && let Err(err) = handler.handle_notification(method, params).await
        {
            warn!(method = %method, error = %err, "Notification handler failed");
        }
    }
}
