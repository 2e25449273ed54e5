//! Notification subscriptions keyed by method name.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, trace};

/// An inbound notification as handed to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub method: String,
    pub params: Option<Value>,
    /// The message exactly as received.
    pub message: Value,
}

pub type NotificationHandler = Arc<dyn Fn(Notification) + Send + Sync>;

/// Identifies one registered handler for [`SubscriptionRegistry::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

#[derive(Default)]
pub struct SubscriptionRegistry {
    handlers: RwLock<HashMap<String, Vec<(SubscriptionId, NotificationHandler)>>>,
    next_id: AtomicU64,
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let methods: Vec<String> = self.handlers.read().keys().cloned().collect();
        f.debug_struct("SubscriptionRegistry")
            .field("methods", &methods)
            .finish()
    }
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, method: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: Fn(Notification) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let method = method.into();
        debug!(method = %method, subscription = %id, "Subscribed");
        self.handlers
            .write()
            .entry(method)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove one handler. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        let mut removed = false;
        handlers.retain(|_, list| {
            let before = list.len();
            list.retain(|(sub, _)| *sub != id);
            removed |= list.len() != before;
            !list.is_empty()
        });
        removed
    }

    /// Remove every handler for `method`, returning how many there were.
    pub fn unsubscribe_all(&self, method: &str) -> usize {
        self.handlers
            .write()
            .remove(method)
            .map(|list| list.len())
            .unwrap_or(0)
    }

    pub fn has_subscribers(&self, method: &str) -> bool {
        self.handlers.read().contains_key(method)
    }

    /// Invoke every handler for the notification's method. Handlers run
    /// outside the lock so they may subscribe or unsubscribe themselves.
    pub fn dispatch(&self, notification: Notification) -> usize {
        let handlers: Vec<NotificationHandler> = match self.handlers.read().get(&notification.method) {
            Some(list) => list.iter().map(|(_, handler)| handler.clone()).collect(),
            None => {
                trace!(method = %notification.method, "No subscribers for notification");
                return 0;
            }
        };
        for handler in &handlers {
            handler(notification.clone());
        }
        handlers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    fn notification(method: &str) -> Notification {
        Notification {
            method: method.to_string(),
            params: Some(json!([1])),
            message: json!({"method": method, "jsonrpc": "2.0", "params": [1]}),
        }
    }

    #[test]
    fn test_dispatch_matches_method() {
        let registry = SubscriptionRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        registry.subscribe("update", move |n| sink.lock().push(n.method));

        assert_eq!(registry.dispatch(notification("update")), 1);
        assert_eq!(registry.dispatch(notification("other")), 0);
        assert_eq!(*seen.lock(), vec!["update".to_string()]);
    }

    #[test]
    fn test_unsubscribe() {
        let registry = SubscriptionRegistry::new();
        let first = registry.subscribe("update", |_| {});
        let _second = registry.subscribe("update", |_| {});

        assert!(registry.unsubscribe(first));
        assert!(!registry.unsubscribe(first));
        assert_eq!(registry.dispatch(notification("update")), 1);
        assert_eq!(registry.unsubscribe_all("update"), 1);
        assert!(!registry.has_subscribers("update"));
    }

    #[test]
    fn test_handler_may_resubscribe() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let inner = registry.clone();
        registry.subscribe("once", move |_| {
            inner.unsubscribe_all("once");
        });
        assert_eq!(registry.dispatch(notification("once")), 1);
        assert_eq!(registry.dispatch(notification("once")), 0);
    }
}
