//! Outstanding call tracking.
//!
//! Every request and batch sent by a client is registered here before it is
//! written. Each entry owns a completion channel and a timer; whichever of
//! {inbound reply, timer, connection close} removes the entry first settles
//! it, and nobody else can.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::classify::BatchMessage;
use crate::error::{LedgerError, RpcError};
use crate::types::{JsonRpcVersion, RequestId};

/// Settlement of a single call: the full response message, or the error.
pub type CallOutcome = Result<Value, RpcError>;

/// Settlement of a batch: every member of the response array.
pub type BatchOutcome = Result<Vec<Value>, BatchFailure>;

/// Why a batch did not resolve.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BatchFailure {
    /// At least one member carried an error; holds the whole response array.
    #[error("Batch rejected with {} member(s)", .0.len())]
    Rejected(Vec<Value>),

    /// The batch timed out or the connection went away.
    #[error(transparent)]
    Failed(RpcError),
}

/// Order-independent identity of a batch: the set of member ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct BatchKey(BTreeSet<RequestId>);

impl BatchKey {
    pub fn new(ids: BTreeSet<RequestId>) -> Self {
        Self(ids)
    }

    pub fn ids(&self) -> &BTreeSet<RequestId> {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<RequestId> for BatchKey {
    fn from_iter<T: IntoIterator<Item = RequestId>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for BatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, id) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            match id {
                RequestId::Number(n) => write!(f, "{}", n)?,
                RequestId::String(s) => write!(f, "{:?}", s)?,
            }
        }
        write!(f, "]")
    }
}

struct CallEntry {
    sender: oneshot::Sender<CallOutcome>,
    timer: AbortHandle,
}

struct BatchEntry {
    sender: oneshot::Sender<BatchOutcome>,
    timer: AbortHandle,
}

#[derive(Default)]
struct LedgerState {
    calls: HashMap<RequestId, CallEntry>,
    batches: HashMap<BatchKey, BatchEntry>,
}

/// Pending calls and batches of one connection.
#[derive(Clone)]
pub struct CallLedger {
    state: Arc<Mutex<LedgerState>>,
    version: JsonRpcVersion,
}

impl fmt::Debug for CallLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("CallLedger")
            .field("version", &self.version)
            .field("calls", &state.calls.len())
            .field("batches", &state.batches.len())
            .finish()
    }
}

impl CallLedger {
    pub fn new(version: JsonRpcVersion) -> Self {
        Self {
            state: Arc::new(Mutex::new(LedgerState::default())),
            version,
        }
    }

    pub fn version(&self) -> JsonRpcVersion {
        self.version
    }

    /// Register a call and arm its timer. Must be called from within a tokio
    /// runtime.
    pub fn register_call(
        &self,
        id: RequestId,
        timeout: Duration,
    ) -> Result<CallHandle, LedgerError> {
        let (sender, receiver) = oneshot::channel();
        let mut state = self.state.lock();
        if state.calls.contains_key(&id) {
            return Err(LedgerError::DuplicateId(id));
        }

        // The timer cannot observe the table before the entry is in it: it
        // has to take the lock we are holding.
        let weak = Arc::downgrade(&self.state);
        let version = self.version;
        let timer_id = id.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            expire_call(weak, version, timer_id);
        })
        .abort_handle();

        state.calls.insert(id.clone(), CallEntry { sender, timer });
        debug!(id = %id, timeout_ms = timeout.as_millis() as u64, "Registered call");

        Ok(CallHandle {
            id,
            version: self.version,
            receiver,
        })
    }

    /// Register a batch under the set of its member ids and arm one timer
    /// for the whole batch.
    pub fn register_batch(
        &self,
        ids: BTreeSet<RequestId>,
        timeout: Duration,
    ) -> Result<BatchHandle, LedgerError> {
        let key = BatchKey::new(ids);
        let (sender, receiver) = oneshot::channel();
        let mut state = self.state.lock();
        if state.batches.contains_key(&key) {
            return Err(LedgerError::DuplicateBatch(key.to_string()));
        }

        let weak = Arc::downgrade(&self.state);
        let version = self.version;
        let timer_key = key.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            expire_batch(weak, version, timer_key);
        })
        .abort_handle();

        debug!(batch = %key, "Registered batch");
        state.batches.insert(key.clone(), BatchEntry { sender, timer });

        Ok(BatchHandle {
            key,
            version: self.version,
            receiver,
        })
    }

    /// Remove and settle the call registered under `id`. Returns false when
    /// nothing was pending for it.
    pub fn settle_call(&self, id: &RequestId, outcome: CallOutcome) -> bool {
        let entry = self.state.lock().calls.remove(id);
        let Some(entry) = entry else {
            warn!(id = %id, "Message has no outstanding calls");
            return false;
        };
        entry.timer.abort();
        // The receiver may have been dropped by a caller that gave up.
        let _ = entry.sender.send(outcome);
        true
    }

    pub fn resolve_call(&self, id: &RequestId, message: Value) -> bool {
        self.settle_call(id, Ok(message))
    }

    pub fn reject_call(&self, id: &RequestId, error: RpcError) -> bool {
        self.settle_call(id, Err(error))
    }

    /// Settle the batch whose id set equals the inbound batch's id set.
    /// Returns false when no registered batch matches exactly.
    pub fn settle_batch(&self, batch: BatchMessage) -> bool {
        if batch.ids.is_empty() {
            warn!("Batch response carries no ids");
            return false;
        }
        let key = BatchKey::new(batch.ids);
        let entry = self.state.lock().batches.remove(&key);
        let Some(entry) = entry else {
            warn!(batch = %key, "Batch response has no outstanding batch");
            return false;
        };
        entry.timer.abort();

        let rejected = batch
            .members
            .iter()
            .any(|member| member.get("error").is_some_and(|e| !e.is_null()));
        let outcome = if rejected {
            Err(BatchFailure::Rejected(batch.members))
        } else {
            Ok(batch.members)
        };
        let _ = entry.sender.send(outcome);
        true
    }

    /// Fail a registered batch, e.g. when it could not be written.
    pub fn reject_batch(&self, key: &BatchKey, error: RpcError) -> bool {
        let entry = self.state.lock().batches.remove(key);
        let Some(entry) = entry else {
            return false;
        };
        entry.timer.abort();
        let _ = entry.sender.send(Err(BatchFailure::Failed(error)));
        true
    }

    /// Fail every pending call and batch with a connection-closed error.
    pub fn close_all(&self) -> usize {
        let (calls, batches) = {
            let mut state = self.state.lock();
            (
                std::mem::take(&mut state.calls),
                std::mem::take(&mut state.batches),
            )
        };
        let count = calls.len() + batches.len();
        if count > 0 {
            debug!(count, "Failing outstanding calls on close");
        }

        for (id, entry) in calls {
            entry.timer.abort();
            let _ = entry
                .sender
                .send(Err(RpcError::connection_closed(self.version, Some(id))));
        }
        for (_, entry) in batches {
            entry.timer.abort();
            let _ = entry.sender.send(Err(BatchFailure::Failed(
                RpcError::connection_closed(self.version, None),
            )));
        }
        count
    }

    pub fn is_pending(&self, id: &RequestId) -> bool {
        self.state.lock().calls.contains_key(id)
    }

    pub fn pending_calls(&self) -> usize {
        self.state.lock().calls.len()
    }

    pub fn pending_batches(&self) -> usize {
        self.state.lock().batches.len()
    }

    /// Timers still armed. Every entry owns exactly one and no timer is left
    /// running once its entry is gone.
    pub fn outstanding_timers(&self) -> usize {
        let state = self.state.lock();
        state
            .calls
            .values()
            .filter(|entry| !entry.timer.is_finished())
            .count()
            + state
                .batches
                .values()
                .filter(|entry| !entry.timer.is_finished())
                .count()
    }
}

fn expire_call(state: Weak<Mutex<LedgerState>>, version: JsonRpcVersion, id: RequestId) {
    let Some(state) = state.upgrade() else {
        return;
    };
    let entry = state.lock().calls.remove(&id);
    if let Some(entry) = entry {
        debug!(id = %id, "Request timed out");
        let _ = entry.sender.send(Err(RpcError::timeout(version, Some(id))));
    }
}

fn expire_batch(state: Weak<Mutex<LedgerState>>, version: JsonRpcVersion, key: BatchKey) {
    let Some(state) = state.upgrade() else {
        return;
    };
    let entry = state.lock().batches.remove(&key);
    if let Some(entry) = entry {
        debug!(batch = %key, "Batch timed out");
        let _ = entry
            .sender
            .send(Err(BatchFailure::Failed(RpcError::timeout(version, None))));
    }
}

/// Completion of a registered call.
#[derive(Debug)]
pub struct CallHandle {
    id: RequestId,
    version: JsonRpcVersion,
    receiver: oneshot::Receiver<CallOutcome>,
}

impl CallHandle {
    pub fn id(&self) -> &RequestId {
        &self.id
    }
}

impl Future for CallHandle {
    type Output = CallOutcome;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.receiver).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(RpcError::connection_closed(
                this.version,
                Some(this.id.clone()),
            ))),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Completion of a registered batch.
#[derive(Debug)]
pub struct BatchHandle {
    key: BatchKey,
    version: JsonRpcVersion,
    receiver: oneshot::Receiver<BatchOutcome>,
}

impl BatchHandle {
    pub fn key(&self) -> &BatchKey {
        &self.key
    }
}

impl Future for BatchHandle {
    type Output = BatchOutcome;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.receiver).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(BatchFailure::Failed(
                RpcError::connection_closed(this.version, None),
            ))),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{Classified, Role, classify};
    use serde_json::json;

    const TIMEOUT: Duration = Duration::from_millis(10);

    fn batch_of(value: Value) -> BatchMessage {
        match classify(value, Role::Client).unwrap() {
            Classified::Batch(batch) => batch,
            other => panic!("not a batch: {:?}", other),
        }
    }

    fn ids(ids: &[i64]) -> BTreeSet<RequestId> {
        ids.iter().copied().map(RequestId::from).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_settles_once() {
        let ledger = CallLedger::new(JsonRpcVersion::V2);
        let handle = ledger.register_call(RequestId::Number(1), TIMEOUT).unwrap();
        assert_eq!(ledger.outstanding_timers(), 1);

        let err = handle.await.unwrap_err();
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            json!({"jsonrpc": "2.0", "error": {"code": -32000, "message": "Request Timeout"}, "id": 1})
        );
        assert_eq!(ledger.pending_calls(), 0);
        assert_eq!(ledger.outstanding_timers(), 0);

        // A late response finds nothing to settle.
        assert!(!ledger.resolve_call(&RequestId::Number(1), json!({"result": 1, "id": 1})));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_timeouts_leave_nothing_behind() {
        let ledger = CallLedger::new(JsonRpcVersion::V2);
        for id in 1..=12 {
            let handle = ledger.register_call(RequestId::Number(id), TIMEOUT).unwrap();
            assert!(handle.await.unwrap_err().is_timeout());
        }
        assert_eq!(ledger.pending_calls(), 0);
        assert_eq!(ledger.outstanding_timers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_response_cancels_timer() {
        let ledger = CallLedger::new(JsonRpcVersion::V2);
        let handle = ledger.register_call(RequestId::from("a"), TIMEOUT).unwrap();
        let response = json!({"result": 19, "jsonrpc": "2.0", "id": "a"});

        assert!(ledger.resolve_call(&RequestId::from("a"), response.clone()));
        assert!(!ledger.resolve_call(&RequestId::from("a"), response.clone()));
        assert_eq!(handle.await.unwrap(), response);

        tokio::time::sleep(TIMEOUT * 2).await;
        assert_eq!(ledger.outstanding_timers(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let ledger = CallLedger::new(JsonRpcVersion::V2);
        let _handle = ledger
            .register_call(RequestId::Number(7), Duration::from_secs(5))
            .unwrap();
        let err = ledger
            .register_call(RequestId::Number(7), Duration::from_secs(5))
            .unwrap_err();
        assert_eq!(err, LedgerError::DuplicateId(RequestId::Number(7)));
        assert_eq!(ledger.pending_calls(), 1);
    }

    #[tokio::test]
    async fn test_reject_call_delivers_error() {
        let ledger = CallLedger::new(JsonRpcVersion::V1);
        let handle = ledger
            .register_call(RequestId::Number(3), Duration::from_secs(5))
            .unwrap();
        let message = json!({"result": null, "error": {"code": -32601, "message": "Method not found"}, "id": 3});
        let error = RpcError::from_message(JsonRpcVersion::V1, &message);
        assert!(ledger.reject_call(&RequestId::Number(3), error.clone()));
        assert_eq!(handle.await.unwrap_err(), error);
    }

    #[tokio::test]
    async fn test_batch_matches_regardless_of_order() {
        let ledger = CallLedger::new(JsonRpcVersion::V2);
        let handle = ledger
            .register_batch(ids(&[1, 2]), Duration::from_secs(5))
            .unwrap();

        let unrelated = batch_of(json!([{"result": 1, "jsonrpc": "2.0", "id": 12}]));
        assert!(!ledger.settle_batch(unrelated));
        let partial = batch_of(json!([{"result": 1, "jsonrpc": "2.0", "id": 1}]));
        assert!(!ledger.settle_batch(partial));

        let response = json!([
            {"result": 2, "jsonrpc": "2.0", "id": 2},
            {"result": 1, "jsonrpc": "2.0", "id": 1}
        ]);
        assert!(ledger.settle_batch(batch_of(response.clone())));
        assert_eq!(Value::Array(handle.await.unwrap()), response);
        assert_eq!(ledger.pending_batches(), 0);
    }

    #[tokio::test]
    async fn test_batch_with_error_member_rejects_whole_array() {
        let ledger = CallLedger::new(JsonRpcVersion::V2);
        let handle = ledger
            .register_batch(ids(&[1, 2, 3]), Duration::from_secs(5))
            .unwrap();
        let response = json!([
            {"result": 1, "jsonrpc": "2.0", "id": 1},
            {"jsonrpc": "2.0", "error": {"code": -32601, "message": "Method not found"}, "id": 2},
            {"result": 3, "jsonrpc": "2.0", "id": 3}
        ]);
        assert!(ledger.settle_batch(batch_of(response.clone())));
        match handle.await {
            Err(BatchFailure::Rejected(members)) => assert_eq!(Value::Array(members), response),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_timeout_has_null_id() {
        let ledger = CallLedger::new(JsonRpcVersion::V2);
        let handle = ledger.register_batch(ids(&[1, 2]), TIMEOUT).unwrap();
        match handle.await {
            Err(BatchFailure::Failed(err)) => {
                assert!(err.is_timeout());
                assert_eq!(err.id, None);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(ledger.outstanding_timers(), 0);
    }

    #[tokio::test]
    async fn test_close_all_fails_everything() {
        let ledger = CallLedger::new(JsonRpcVersion::V2);
        let call = ledger
            .register_call(RequestId::Number(1), Duration::from_secs(5))
            .unwrap();
        let batch = ledger
            .register_batch(ids(&[2, 3]), Duration::from_secs(5))
            .unwrap();

        assert_eq!(ledger.close_all(), 2);
        assert_eq!(ledger.pending_calls(), 0);
        assert_eq!(ledger.pending_batches(), 0);

        let err = call.await.unwrap_err();
        assert_eq!(err.id, Some(RequestId::Number(1)));
        assert_eq!(err.error.message, "Connection closed");
        assert!(matches!(batch.await, Err(BatchFailure::Failed(_))));
    }

    #[test]
    fn test_batch_key_display() {
        let key: BatchKey = [RequestId::from(2), RequestId::from("a"), RequestId::from(1)]
            .into_iter()
            .collect();
        assert_eq!(key.to_string(), "[1,2,\"a\"]");
        assert_ne!(BatchKey::new(ids(&[1, 2])), BatchKey::new(ids(&[12])));
    }
}
