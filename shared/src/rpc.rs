//! Correlated request/response protocol over the messaging channel
//!
//! Both the supervisor and the worker runtime drive one [`Endpoint`] per
//! channel, so either side can initiate requests. Outbound requests are
//! tracked in a pending table keyed by a role-qualified correlation id;
//! inbound envelopes are dispatched against the pending table first, then
//! the registered request handlers, then the signal subscribers. Matching
//! pending entries before handlers means a response can never re-trigger a
//! handler registered under the same event name.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::errors::RequestError;
use crate::messages::Envelope;
use crate::types::ProcessRole;

/// How long a request waits for its matching response. Fixed on purpose:
/// per-call timeouts would let stale listeners accumulate unbounded.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

type HandlerFn =
    dyn Fn(Option<Value>) -> BoxFuture<'static, anyhow::Result<Option<Value>>> + Send + Sync;

/// Request handlers keyed by event name.
///
/// One table can back many endpoints - the supervisor shares a single table
/// across every worker channel so a handler registered once answers
/// requests from any worker, with the response routed back on the channel
/// the request arrived on.
#[derive(Clone, Default)]
pub struct HandlerTable {
    inner: Arc<Mutex<HashMap<String, Arc<HandlerFn>>>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for an event, replacing any previous one
    pub fn register<F, Fut>(&self, event: impl Into<String>, handler: F)
    where
        F: Fn(Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Option<Value>>> + Send + 'static,
    {
        let handler: Arc<HandlerFn> = Arc::new(move |payload| Box::pin(handler(payload)));
        self.inner
            .lock()
            .expect("handler table poisoned")
            .insert(event.into(), handler);
    }

    fn get(&self, event: &str) -> Option<Arc<HandlerFn>> {
        self.inner
            .lock()
            .expect("handler table poisoned")
            .get(event)
            .cloned()
    }
}

struct PendingRequest {
    event: String,
    respond_to: oneshot::Sender<Result<Option<Value>, RequestError>>,
}

/// One side of a worker channel speaking the correlated protocol
#[derive(Clone)]
pub struct Endpoint {
    role: ProcessRole,
    outbound: mpsc::UnboundedSender<Envelope>,
    pending: Arc<Mutex<HashMap<String, PendingRequest>>>,
    handlers: HandlerTable,
    signals: Arc<Mutex<HashMap<String, Vec<mpsc::UnboundedSender<Option<Value>>>>>>,
    next_seq: Arc<AtomicU64>,
}

impl Endpoint {
    /// Create an endpoint writing outbound envelopes into `outbound`.
    ///
    /// The caller owns the transport: a writer task drains the receiver half
    /// onto the wire, and a pump task feeds inbound frames to [`dispatch`].
    ///
    /// [`dispatch`]: Endpoint::dispatch
    pub fn new(
        role: ProcessRole,
        outbound: mpsc::UnboundedSender<Envelope>,
        handlers: HandlerTable,
    ) -> Self {
        Self {
            role,
            outbound,
            pending: Arc::new(Mutex::new(HashMap::new())),
            handlers,
            signals: Arc::new(Mutex::new(HashMap::new())),
            next_seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Best-effort send: a gone peer is logged, never an error
    pub fn send(&self, envelope: Envelope) {
        if self.outbound.send(envelope).is_err() {
            tracing::warn!(process = %self.role, "message send failed, peer channel is gone");
        }
    }

    /// Send a request and await the matching response.
    ///
    /// The response matches on correlation id and event name. A remote
    /// `error` field surfaces as [`RequestError::Remote`]; no response
    /// within [`REQUEST_TIMEOUT`] surfaces as [`RequestError::Timeout`]
    /// with the pending entry removed, so nothing leaks.
    pub async fn request(
        &self,
        event: &str,
        payload: Option<Value>,
    ) -> Result<Option<Value>, RequestError> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let id = format!("{}-{}", self.role.id_prefix(), seq);

        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("pending table poisoned")
            .insert(
                id.clone(),
                PendingRequest {
                    event: event.to_string(),
                    respond_to: tx,
                },
            );

        self.send(Envelope::request(id.clone(), event, payload));

        match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(RequestError::ChannelClosed),
            Err(_) => {
                self.pending
                    .lock()
                    .expect("pending table poisoned")
                    .remove(&id);
                Err(RequestError::Timeout {
                    event: event.to_string(),
                    timeout: REQUEST_TIMEOUT,
                })
            }
        }
    }

    /// Register a request handler for an event.
    ///
    /// Each matching inbound request spawns the handler and sends back
    /// exactly one response: the payload on success, the error message on
    /// failure.
    pub fn request_handler<F, Fut>(&self, event: impl Into<String>, handler: F)
    where
        F: Fn(Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Option<Value>>> + Send + 'static,
    {
        self.handlers.register(event, handler);
    }

    /// Subscribe to a fire-and-forget signal event.
    ///
    /// Every subscriber gets its own stream, so the protocol layer and
    /// plugin-registered listeners coexist on one channel.
    pub fn wait_signal(&self, event: impl Into<String>) -> mpsc::UnboundedReceiver<Option<Value>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.signals
            .lock()
            .expect("signal table poisoned")
            .entry(event.into())
            .or_default()
            .push(tx);
        rx
    }

    /// Route one inbound envelope.
    ///
    /// Precedence: pending request (id + event match) -> registered request
    /// handler -> signal subscribers. Correlated messages nobody claims are
    /// dropped with a trace record; the requester on the other end times out.
    pub async fn dispatch(&self, envelope: Envelope) {
        if let Some(id) = envelope.id.clone() {
            let matched = {
                let mut pending = self.pending.lock().expect("pending table poisoned");
                match pending.get(&id) {
                    Some(entry) if entry.event == envelope.event => pending.remove(&id),
                    _ => None,
                }
            };
            if let Some(entry) = matched {
                let outcome = match envelope.error {
                    Some(message) => Err(RequestError::Remote(message)),
                    None => Ok(envelope.payload),
                };
                // Receiver may have timed out already; either way exactly
                // one outcome reaches the caller
                let _ = entry.respond_to.send(outcome);
                return;
            }

            if let Some(handler) = self.handlers.get(&envelope.event) {
                let endpoint = self.clone();
                let event = envelope.event.clone();
                let payload = envelope.payload;
                tokio::spawn(async move {
                    match handler(payload).await {
                        Ok(result) => endpoint.send(Envelope::response(id, event, result)),
                        Err(err) => {
                            endpoint.send(Envelope::response_error(id, event, err.to_string()))
                        }
                    }
                });
                return;
            }

            tracing::trace!(event = %envelope.event, %id, "unclaimed correlated message dropped");
            return;
        }

        let mut signals = self.signals.lock().expect("signal table poisoned");
        if let Some(subscribers) = signals.get_mut(&envelope.event) {
            subscribers.retain(|tx| tx.send(envelope.payload.clone()).is_ok());
        }
    }

    /// Fail every outstanding request with [`RequestError::ChannelClosed`].
    /// Called when the underlying channel tears down.
    pub fn fail_pending(&self) {
        let drained: Vec<PendingRequest> = self
            .pending
            .lock()
            .expect("pending table poisoned")
            .drain()
            .map(|(_, entry)| entry)
            .collect();
        for entry in drained {
            let _ = entry.respond_to.send(Err(RequestError::ChannelClosed));
        }
    }

    /// Number of requests still awaiting a response
    pub fn pending_len(&self) -> usize {
        self.pending.lock().expect("pending table poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::SIGNAL_OUT_OF_MEMORY;
    use anyhow::anyhow;
    use serde_json::json;

    /// Two endpoints wired back-to-back, each dispatching what the other sends
    fn connected_pair() -> (Endpoint, Endpoint) {
        let (sup_tx, mut sup_rx) = mpsc::unbounded_channel();
        let (wrk_tx, mut wrk_rx) = mpsc::unbounded_channel();

        let supervisor = Endpoint::new(ProcessRole::Supervisor, sup_tx, HandlerTable::new());
        let worker = Endpoint::new(ProcessRole::Worker(1), wrk_tx, HandlerTable::new());

        let to_worker = worker.clone();
        tokio::spawn(async move {
            while let Some(envelope) = sup_rx.recv().await {
                to_worker.dispatch(envelope).await;
            }
        });
        let to_supervisor = supervisor.clone();
        tokio::spawn(async move {
            while let Some(envelope) = wrk_rx.recv().await {
                to_supervisor.dispatch(envelope).await;
            }
        });

        (supervisor, worker)
    }

    #[tokio::test]
    async fn echo_request_resolves_with_the_payload() {
        let (supervisor, worker) = connected_pair();
        worker.request_handler("echo", |payload| async move { Ok(payload) });

        let response = supervisor.request("echo", Some(json!({"v": 1}))).await.unwrap();
        assert_eq!(response, Some(json!({"v": 1})));
        assert_eq!(supervisor.pending_len(), 0);
    }

    #[tokio::test]
    async fn failing_handler_surfaces_the_remote_message() {
        let (supervisor, worker) = connected_pair();
        worker.request_handler("explode", |_| async move {
            Err::<Option<Value>, _>(anyhow!("bad"))
        });

        match supervisor.request("explode", None).await {
            Err(RequestError::Remote(message)) => assert_eq!(message, "bad"),
            other => panic!("expected remote error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn concurrent_requests_never_cross_deliver() {
        let (supervisor, worker) = connected_pair();
        worker.request_handler("double", |payload| async move {
            let v = payload.and_then(|p| p.as_u64()).unwrap_or(0);
            Ok(Some(json!(v * 2)))
        });

        let mut tasks = Vec::new();
        for v in 0..16u64 {
            let endpoint = supervisor.clone();
            tasks.push(tokio::spawn(async move {
                (v, endpoint.request("double", Some(json!(v))).await.unwrap())
            }));
        }
        for task in tasks {
            let (v, response) = task.await.unwrap();
            assert_eq!(response, Some(json!(v * 2)));
        }
        assert_eq!(supervisor.pending_len(), 0);
    }

    #[tokio::test]
    async fn both_sides_can_initiate() {
        let (supervisor, worker) = connected_pair();
        supervisor.request_handler("lookup", |_| async move { Ok(Some(json!("from-supervisor"))) });

        let response = worker.request("lookup", None).await.unwrap();
        assert_eq!(response, Some(json!("from-supervisor")));
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_request_times_out_and_leaves_no_listener() {
        let (supervisor, _worker) = connected_pair();

        let outcome = supervisor.request("nobody.home", None).await;
        assert!(matches!(outcome, Err(RequestError::Timeout { .. })));
        assert_eq!(supervisor.pending_len(), 0);
    }

    #[tokio::test]
    async fn channel_teardown_fails_outstanding_requests() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let endpoint = Endpoint::new(ProcessRole::Supervisor, tx, HandlerTable::new());

        let in_flight = {
            let endpoint = endpoint.clone();
            tokio::spawn(async move { endpoint.request("orphaned", None).await })
        };
        tokio::task::yield_now().await;
        endpoint.fail_pending();

        match in_flight.await.unwrap() {
            Err(RequestError::ChannelClosed) => {}
            other => panic!("expected channel-closed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn signals_fan_out_to_every_subscriber() {
        let (supervisor, worker) = connected_pair();
        let mut first = supervisor.wait_signal(SIGNAL_OUT_OF_MEMORY);
        let mut second = supervisor.wait_signal(SIGNAL_OUT_OF_MEMORY);

        worker.send(Envelope::signal_with(SIGNAL_OUT_OF_MEMORY, json!(123)));

        assert_eq!(first.recv().await.unwrap(), Some(json!(123)));
        assert_eq!(second.recv().await.unwrap(), Some(json!(123)));
    }

    #[tokio::test]
    async fn correlation_ids_carry_the_role_prefix() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let endpoint = Endpoint::new(ProcessRole::Worker(4), tx, HandlerTable::new());

        let request = {
            let endpoint = endpoint.clone();
            tokio::spawn(async move { endpoint.request("whoami", None).await })
        };
        let envelope = rx.recv().await.unwrap();
        assert!(envelope.id.as_deref().unwrap().starts_with("worker-4-"));
        assert_eq!(envelope.event, "whoami");

        endpoint.fail_pending();
        let _ = request.await.unwrap();
    }
}
