//! Request/response correlation.
//!
//! Every outgoing request gets a fresh id and a pending entry. A response
//! whose id matches a pending entry resolves it exactly once, in whatever
//! order responses arrive. Entries are stamped with the connection
//! generation that issued them, so a deadline firing after a reconnect can
//! never touch an entry that belongs to the new connection.

use std::collections::HashMap;
use std::time::Duration;

use overseer_protocol::{ErrorShape, RequestFrame, ResponseFrame};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::GatewayError;

type Reply = Result<Value, GatewayError>;

struct Pending {
    generation: u64,
    method: String,
    tx: oneshot::Sender<Reply>,
}

struct State {
    generation: u64,
    next_id: u64,
    pending: HashMap<String, Pending>,
}

/// Pending-request table shared by the read loop and callers.
pub struct Correlator {
    state: Mutex<State>,
}

impl Correlator {
    /// Empty table at generation 0.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                generation: 0,
                next_id: 1,
                pending: HashMap::new(),
            }),
        }
    }

    /// Start a new connection generation.
    ///
    /// Rejects everything still pending with [`GatewayError::Disconnected`]
    /// and restarts id allocation.
    pub fn reset(&self, generation: u64) {
        let drained = {
            let mut state = self.state.lock();
            state.generation = generation;
            state.next_id = 1;
            std::mem::take(&mut state.pending)
        };
        reject(drained, &GatewayError::Disconnected);
    }

    /// Reject every pending request with `error`.
    pub fn reject_all(&self, error: &GatewayError) {
        let drained = std::mem::take(&mut self.state.lock().pending);
        reject(drained, error);
    }

    /// Route a response to its pending request.
    ///
    /// Returns `false` for responses nobody is waiting on (unknown id, or
    /// arriving after the caller timed out); those are dropped.
    pub fn resolve(&self, response: ResponseFrame) -> bool {
        let Some(pending) = self.state.lock().pending.remove(&response.id) else {
            warn!(id = %response.id, "dropping response with no pending request");
            return false;
        };
        let reply = if response.ok {
            Ok(response.payload.unwrap_or(Value::Null))
        } else {
            let error = response
                .error
                .unwrap_or_else(|| ErrorShape::new("UNKNOWN", "request failed"));
            Err(GatewayError::Rpc {
                code: error.code,
                message: error.message,
            })
        };
        debug!(id = %response.id, method = %pending.method, ok = response.ok, "response matched");
        let _ = pending.tx.send(reply);
        true
    }

    /// Drop the pending entry for `id` if it still belongs to `generation`.
    pub fn expire(&self, id: &str, generation: u64) -> bool {
        let mut state = self.state.lock();
        match state.pending.get(id) {
            Some(pending) if pending.generation == generation => {
                let _ = state.pending.remove(id);
                true
            }
            _ => false,
        }
    }

    /// Number of requests awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Issue a request and wait for its response.
    ///
    /// `send` puts the frame on the wire; if it fails the entry is removed
    /// and its error returned. The pending entry is removed exactly once:
    /// by a matching response, by the deadline, or by a reset.
    pub async fn call<F>(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
        send: F,
    ) -> Result<Value, GatewayError>
    where
        F: FnOnce(RequestFrame) -> Result<(), GatewayError>,
    {
        let (id, generation, rx) = self.register(method);
        let frame = RequestFrame {
            id: id.clone(),
            method: method.to_string(),
            params,
        };
        if let Err(err) = send(frame) {
            let _ = self.expire(&id, generation);
            return Err(err);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(GatewayError::Disconnected),
            Err(_) => {
                let _ = self.expire(&id, generation);
                warn!(%id, method, "request timed out");
                Err(GatewayError::RequestTimeout {
                    method: method.to_string(),
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                })
            }
        }
    }

    fn register(&self, method: &str) -> (String, u64, oneshot::Receiver<Reply>) {
        let (tx, rx) = oneshot::channel();
        let mut state = self.state.lock();
        let id = state.next_id.to_string();
        state.next_id += 1;
        let generation = state.generation;
        let _ = state.pending.insert(
            id.clone(),
            Pending {
                generation,
                method: method.to_string(),
                tx,
            },
        );
        (id, generation, rx)
    }
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

fn reject(drained: HashMap<String, Pending>, error: &GatewayError) {
    if !drained.is_empty() {
        debug!(count = drained.len(), %error, "rejecting pending requests");
    }
    for (_, pending) in drained {
        let _ = pending.tx.send(Err(error.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;
    use std::sync::Arc;

    const LONG: Duration = Duration::from_secs(5);

    /// Spawn a call whose frames are captured into a channel.
    fn spawn_call(
        correlator: &Arc<Correlator>,
        method: &'static str,
        timeout: Duration,
    ) -> (
        tokio::task::JoinHandle<Result<Value, GatewayError>>,
        tokio::sync::mpsc::UnboundedReceiver<RequestFrame>,
    ) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let c = Arc::clone(correlator);
        let handle = tokio::spawn(async move {
            c.call(method, None, timeout, |frame| {
                tx.send(frame).map_err(|_| GatewayError::NotConnected)
            })
            .await
        });
        (handle, rx)
    }

    #[tokio::test]
    async fn out_of_order_responses_resolve_their_callers() {
        let correlator = Arc::new(Correlator::new());
        let (a, mut a_rx) = spawn_call(&correlator, "first", LONG);
        let a_frame = a_rx.recv().await.unwrap();
        let (b, mut b_rx) = spawn_call(&correlator, "second", LONG);
        let b_frame = b_rx.recv().await.unwrap();
        assert_ne!(a_frame.id, b_frame.id);

        assert!(correlator.resolve(ResponseFrame::ok(b_frame.id, json!("B"))));
        assert!(correlator.resolve(ResponseFrame::ok(a_frame.id, json!("A"))));

        assert_eq!(a.await.unwrap().unwrap(), json!("A"));
        assert_eq!(b.await.unwrap().unwrap(), json!("B"));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn error_response_becomes_rpc_error() {
        let correlator = Arc::new(Correlator::new());
        let (call, mut rx) = spawn_call(&correlator, "sessions.list", LONG);
        let frame = rx.recv().await.unwrap();
        let _ = correlator.resolve(ResponseFrame::err(
            frame.id,
            ErrorShape::new("UNAUTHORIZED", "scope missing"),
        ));
        assert_matches!(
            call.await.unwrap(),
            Err(GatewayError::Rpc { code, message }) if code == "UNAUTHORIZED" && message == "scope missing"
        );
    }

    #[tokio::test]
    async fn missing_payload_resolves_to_null() {
        let correlator = Arc::new(Correlator::new());
        let (call, mut rx) = spawn_call(&correlator, "status", LONG);
        let frame = rx.recv().await.unwrap();
        let _ = correlator.resolve(ResponseFrame {
            id: frame.id,
            ok: true,
            payload: None,
            error: None,
        });
        assert_eq!(call.await.unwrap().unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn timeout_then_late_response_is_dropped() {
        let correlator = Arc::new(Correlator::new());
        let (call, mut rx) = spawn_call(&correlator, "usage.cost", Duration::from_millis(20));
        let frame = rx.recv().await.unwrap();
        assert_matches!(
            call.await.unwrap(),
            Err(GatewayError::RequestTimeout { method, timeout_ms: 20 }) if method == "usage.cost"
        );
        assert_eq!(correlator.pending_count(), 0);
        assert!(!correlator.resolve(ResponseFrame::ok(frame.id, json!({}))));
    }

    #[tokio::test]
    async fn unknown_id_is_ignored_with_a_warning() {
        let (logs, _guard) = overseer_logging::capture_logs();
        let correlator = Correlator::new();
        assert!(!correlator.resolve(ResponseFrame::ok("999", json!(null))));
        assert!(logs.has_event(tracing::Level::WARN, "dropping response with no pending request"));
    }

    #[tokio::test]
    async fn send_failure_clears_entry() {
        let correlator = Correlator::new();
        let result = correlator
            .call("status", None, LONG, |_| Err(GatewayError::NotConnected))
            .await;
        assert_matches!(result, Err(GatewayError::NotConnected));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn reset_rejects_pending_as_disconnected() {
        let correlator = Arc::new(Correlator::new());
        let (call, mut rx) = spawn_call(&correlator, "chat.history", LONG);
        let _ = rx.recv().await.unwrap();
        correlator.reset(1);
        assert_matches!(call.await.unwrap(), Err(GatewayError::Disconnected));
    }

    #[tokio::test]
    async fn reject_all_uses_given_error() {
        let correlator = Arc::new(Correlator::new());
        let (call, mut rx) = spawn_call(&correlator, "status", LONG);
        let _ = rx.recv().await.unwrap();
        correlator.reject_all(&GatewayError::Socket("reset by peer".into()));
        assert_matches!(call.await.unwrap(), Err(GatewayError::Socket(_)));
    }

    #[test]
    fn stale_generation_cannot_expire_new_entry() {
        let correlator = Correlator::new();
        let (old_id, old_gen, _old_rx) = correlator.register("a");
        correlator.reset(1);
        let (new_id, _, _new_rx) = correlator.register("b");
        assert_eq!(old_id, new_id);
        assert!(!correlator.expire(&old_id, old_gen));
        assert_eq!(correlator.pending_count(), 1);
    }

    #[test]
    fn ids_are_unique_within_generation() {
        let correlator = Correlator::new();
        let ids: Vec<String> = (0..5).map(|_| correlator.register("m").0).collect();
        let mut unique = ids.clone();
        unique.dedup();
        assert_eq!(ids, unique);
        assert_eq!(ids[0], "1");
    }
}
