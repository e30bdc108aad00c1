//! The gateway client.
//!
//! One [`GatewayClient`] owns at most one physical WebSocket link. All
//! inbound frames are decoded on a single read task per link; callers of
//! [`GatewayClient::request`] suspend independently on the correlator.
//!
//! Every connect attempt starts a new *generation*. Frames, deadlines and
//! close notifications tagged with an older generation are ignored, which
//! keeps a stale socket from touching the state of its successor.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use futures::future::{BoxFuture, Shared};
use futures::stream::{SplitSink, SplitStream};
use futures::{FutureExt, SinkExt, StreamExt};
use overseer_protocol::events::names as event_names;
use overseer_protocol::methods::names as method_names;
use overseer_protocol::{
    ChatHistory, ChatHistoryParams, ConnectChallenge, EventFrame, Frame, HelloOk, RequestFrame,
    SessionsList,
};
use overseer_settings::OverseerSettings;
use overseer_state::{Reconciler, ReconcilerConfig};
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::ClientConfig;
use crate::correlator::Correlator;
use crate::dispatcher::{EventDispatcher, Route};
use crate::error::GatewayError;
use crate::listeners::{ListenerHandle, ListenerSet};
use crate::snapshot::{ConnectionStatus, GatewaySnapshot};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type ConnectAttempt = Shared<BoxFuture<'static, Result<HelloOk, GatewayError>>>;

#[derive(Clone)]
struct Target {
    url: String,
    token: Option<String>,
}

/// One physical connection.
struct Link {
    generation: u64,
    outbound: mpsc::UnboundedSender<Message>,
    authenticated: bool,
    reader: JoinHandle<()>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Public handle
// ─────────────────────────────────────────────────────────────────────────────

/// Handle to a gateway connection. Cheap to clone; clones share the link.
#[derive(Clone)]
pub struct GatewayClient {
    inner: Arc<ClientInner>,
}

impl GatewayClient {
    /// Client with its own default-configured reconciler.
    pub fn new(config: ClientConfig) -> Self {
        Self::with_state(config, Arc::new(Reconciler::default()))
    }

    /// Client feeding an existing reconciler.
    pub fn with_state(config: ClientConfig, state: Arc<Reconciler>) -> Self {
        let target = Target {
            url: config.url.clone(),
            token: config.token.clone(),
        };
        Self {
            inner: Arc::new(ClientInner {
                config,
                target: RwLock::new(target),
                generation: AtomicU64::new(0),
                status: RwLock::new(ConnectionStatus::Disconnected),
                transition: ReentrantMutex::new(()),
                status_listeners: ListenerSet::new(),
                dispatcher: EventDispatcher::new(),
                correlator: Correlator::new(),
                link: Mutex::new(None),
                attempt: Mutex::new(None),
                attempts: AtomicU64::new(0),
                hello: RwLock::new(None),
                snapshot: RwLock::new(GatewaySnapshot::default()),
                reconnect: Mutex::new(None),
                state,
            }),
        }
    }

    /// Client and reconciler both configured from loaded settings.
    pub fn from_settings(settings: &OverseerSettings) -> Self {
        Self::with_state(
            ClientConfig::from_settings(&settings.gateway),
            Arc::new(Reconciler::new(ReconcilerConfig::from_settings(settings))),
        )
    }

    /// The active configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// The reconciler fed by this client's events.
    pub fn state(&self) -> &Arc<Reconciler> {
        &self.inner.state
    }

    /// Current connection status.
    pub fn connection_status(&self) -> ConnectionStatus {
        *self.inner.status.read()
    }

    /// Whether the handshake has completed on the current link.
    pub fn is_connected(&self) -> bool {
        self.connection_status() == ConnectionStatus::Connected
    }

    /// Handshake result of the current link.
    pub fn hello(&self) -> Option<HelloOk> {
        self.inner.hello.read().clone()
    }

    /// Latest presence/health snapshot.
    pub fn snapshot(&self) -> GatewaySnapshot {
        self.inner.snapshot.read().clone()
    }

    /// Number of requests awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.inner.correlator.pending_count()
    }

    /// Receive every raw event frame, system events included.
    pub fn on_event(
        &self,
        listener: impl Fn(&EventFrame) + Send + Sync + 'static,
    ) -> ListenerHandle {
        self.inner.dispatcher.subscribe(listener)
    }

    /// Receive connection status transitions. Repeated identical statuses
    /// are not re-announced.
    pub fn on_connection_change(
        &self,
        listener: impl Fn(&ConnectionStatus) + Send + Sync + 'static,
    ) -> ListenerHandle {
        self.inner.status_listeners.add(listener)
    }

    /// Connect and complete the handshake.
    ///
    /// Returns the existing handshake result when already connected.
    /// Concurrent calls share the in-flight attempt instead of opening a
    /// second socket.
    pub async fn connect(&self) -> Result<HelloOk, GatewayError> {
        let attempt = {
            let mut slot = self.inner.attempt.lock();
            if slot.is_none() && self.is_connected() {
                if let Some(hello) = self.hello() {
                    return Ok(hello);
                }
            }
            match slot.as_ref() {
                Some((_, attempt)) => attempt.clone(),
                None => {
                    let id = self.inner.attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    let inner = Arc::clone(&self.inner);
                    let task = tokio::spawn(inner.run_connect(id));
                    let attempt = async move {
                        task.await.unwrap_or_else(|err| {
                            Err(GatewayError::Socket(format!("connect task failed: {err}")))
                        })
                    }
                    .boxed()
                    .shared();
                    *slot = Some((id, attempt.clone()));
                    attempt
                }
            }
        };
        attempt.await
    }

    /// Point the client at `url` with `token`, then [`connect`](Self::connect).
    ///
    /// While already connected the new target only applies to the next
    /// attempt.
    pub async fn connect_to(
        &self,
        url: impl Into<String>,
        token: Option<String>,
    ) -> Result<HelloOk, GatewayError> {
        *self.inner.target.write() = Target {
            url: url.into(),
            token,
        };
        self.connect().await
    }

    /// Close the link and stop any scheduled reconnect.
    ///
    /// Pending requests are rejected with [`GatewayError::Disconnected`]. An
    /// in-flight connect attempt is abandoned; the next
    /// [`connect`](Self::connect) starts a fresh one.
    pub fn disconnect(&self) {
        let inner = &self.inner;
        let _ = inner.generation.fetch_add(1, Ordering::SeqCst);
        *inner.attempt.lock() = None;
        inner.cancel_reconnect();
        inner.teardown_link();
        inner.correlator.reject_all(&GatewayError::Disconnected);
        *inner.hello.write() = None;
        info!("gateway disconnected by client");
        inner.set_status(ConnectionStatus::Disconnected);
    }

    /// Issue one RPC on the authenticated link.
    #[instrument(skip_all, name = "gateway.request", fields(method = %method))]
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, GatewayError> {
        let generation = match self.inner.link.lock().as_ref() {
            Some(link) if link.authenticated => link.generation,
            _ => return Err(GatewayError::NotConnected),
        };
        let inner = &self.inner;
        inner
            .correlator
            .call(method, params, inner.config.request_timeout, |frame| {
                inner.send(generation, frame)
            })
            .await
    }

    // ── typed methods ──

    /// `sessions.list`.
    pub async fn sessions_list(&self) -> Result<SessionsList, GatewayError> {
        let payload = self.request(method_names::SESSIONS_LIST, None).await?;
        decode(method_names::SESSIONS_LIST, payload)
    }

    /// `sessions.list`, folded into the reconciler. Returns the row count.
    pub async fn refresh_sessions(&self) -> Result<usize, GatewayError> {
        let list = self.sessions_list().await?;
        self.inner.state.reconcile_listing(&list.sessions, Utc::now());
        debug!(sessions = list.sessions.len(), "session listing reconciled");
        Ok(list.sessions.len())
    }

    /// `chat.history` for one session.
    pub async fn chat_history(
        &self,
        session_key: &str,
        limit: Option<u32>,
    ) -> Result<ChatHistory, GatewayError> {
        let params = ChatHistoryParams {
            session_key: session_key.to_string(),
            limit,
        };
        let params = serde_json::to_value(params)
            .map_err(|err| GatewayError::Protocol(err.to_string()))?;
        let payload = self.request(method_names::CHAT_HISTORY, Some(params)).await?;
        decode(method_names::CHAT_HISTORY, payload)
    }

    /// `usage.cost`, passed through untouched.
    pub async fn usage_cost(&self, params: Option<Value>) -> Result<Value, GatewayError> {
        self.request(method_names::USAGE_COST, params).await
    }

    /// `status`, passed through untouched.
    pub async fn status(&self) -> Result<Value, GatewayError> {
        self.request(method_names::STATUS, None).await
    }
}

impl std::fmt::Debug for GatewayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayClient")
            .field("url", &self.inner.target.read().url)
            .field("status", &self.connection_status())
            .finish_non_exhaustive()
    }
}

fn decode<T: DeserializeOwned>(method: &str, payload: Value) -> Result<T, GatewayError> {
    serde_json::from_value(payload)
        .map_err(|err| GatewayError::Protocol(format!("invalid {method} result: {err}")))
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn close_message() -> Message {
    Message::Close(Some(CloseFrame {
        code: CloseCode::Normal,
        reason: "client disconnect".into(),
    }))
}

// ─────────────────────────────────────────────────────────────────────────────
// Connection internals
// ─────────────────────────────────────────────────────────────────────────────

struct ClientInner {
    config: ClientConfig,
    target: RwLock<Target>,
    generation: AtomicU64,
    status: RwLock<ConnectionStatus>,
    /// Serializes status changes with their notification.
    transition: ReentrantMutex<()>,
    status_listeners: ListenerSet<ConnectionStatus>,
    dispatcher: EventDispatcher,
    correlator: Correlator,
    link: Mutex<Option<Link>>,
    attempt: Mutex<Option<(u64, ConnectAttempt)>>,
    attempts: AtomicU64,
    hello: RwLock<Option<HelloOk>>,
    snapshot: RwLock<GatewaySnapshot>,
    reconnect: Mutex<Option<CancellationToken>>,
    state: Arc<Reconciler>,
}

impl ClientInner {
    #[instrument(skip_all, name = "gateway.connect", fields(url))]
    async fn run_connect(self: Arc<Self>, attempt: u64) -> Result<HelloOk, GatewayError> {
        let _ = tracing::Span::current().record("url", self.target.read().url.as_str());
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.cancel_reconnect();
        self.teardown_link();
        self.correlator.reset(generation);
        self.state.forget_runs();
        self.set_status(ConnectionStatus::Connecting);

        let window = self.config.handshake_timeout;
        let outcome = tokio::time::timeout(window, Arc::clone(&self).handshake(generation))
            .await
            .unwrap_or_else(|_| {
                Err(GatewayError::HandshakeTimeout {
                    timeout_ms: millis(window),
                })
            });

        let outcome = match outcome {
            Ok(hello) if self.promote(generation, &hello) => Ok(hello),
            Ok(_) => Err(GatewayError::Disconnected),
            Err(err) => Err(err),
        };
        if let Err(err) = &outcome {
            warn!(error = %err, "gateway handshake failed");
            if self.generation.load(Ordering::SeqCst) == generation {
                self.teardown_link();
                self.correlator.reject_all(&GatewayError::Disconnected);
                self.set_status(ConnectionStatus::Error);
            }
        }
        let mut slot = self.attempt.lock();
        if slot.as_ref().is_some_and(|(id, _)| *id == attempt) {
            *slot = None;
        }
        drop(slot);
        outcome
    }

    async fn handshake(self: Arc<Self>, generation: u64) -> Result<HelloOk, GatewayError> {
        let Target { url, token } = self.target.read().clone();
        debug!(%url, "opening gateway socket");
        let (ws, _) = connect_async(url.as_str())
            .await
            .map_err(|err| GatewayError::Socket(err.to_string()))?;
        let (sink, stream) = ws.split();

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (challenge_tx, challenge_rx) = oneshot::channel();
        drop(tokio::spawn(write_loop(sink, outbound_rx)));
        let reader = tokio::spawn(read_loop(Arc::clone(&self), stream, generation, challenge_tx));
        {
            let mut link = self.link.lock();
            if self.generation.load(Ordering::SeqCst) != generation {
                reader.abort();
                let _ = outbound.send(close_message());
                return Err(GatewayError::Disconnected);
            }
            *link = Some(Link {
                generation,
                outbound,
                authenticated: false,
                reader,
            });
        }

        let challenge = challenge_rx.await.map_err(|_| {
            GatewayError::Socket("connection closed before challenge".to_string())
        })?;
        debug!(nonce = %challenge.nonce, "connect challenge received");

        let params = serde_json::to_value(self.config.connect_params(token))
            .map_err(|err| GatewayError::Protocol(err.to_string()))?;
        let payload = self
            .correlator
            .call(
                method_names::CONNECT,
                Some(params),
                self.config.handshake_timeout,
                |frame| self.send(generation, frame),
            )
            .await
            .map_err(|err| match err {
                GatewayError::Rpc { message, .. } => GatewayError::Handshake { reason: message },
                other => other,
            })?;

        let hello: HelloOk = serde_json::from_value(payload)
            .map_err(|err| GatewayError::Protocol(format!("invalid hello-ok payload: {err}")))?;
        hello.validate().map_err(GatewayError::Protocol)?;
        Ok(hello)
    }

    /// Mark the link authenticated and publish the handshake result.
    fn promote(&self, generation: u64, hello: &HelloOk) -> bool {
        {
            let mut link = self.link.lock();
            match link.as_mut() {
                Some(link) if link.generation == generation => link.authenticated = true,
                _ => return false,
            }
        }
        *self.snapshot.write() = GatewaySnapshot::from_hello(hello);
        *self.hello.write() = Some(hello.clone());
        info!(
            server = %hello.server.version,
            conn_id = %hello.server.conn_id,
            protocol = hello.protocol,
            "gateway connected"
        );
        self.set_status(ConnectionStatus::Connected);
        true
    }

    fn send(&self, generation: u64, frame: RequestFrame) -> Result<(), GatewayError> {
        let text = Frame::Request(frame)
            .encode()
            .map_err(|err| GatewayError::Protocol(err.to_string()))?;
        match self.link.lock().as_ref() {
            Some(link) if link.generation == generation => link
                .outbound
                .send(Message::Text(text.into()))
                .map_err(|_| GatewayError::Disconnected),
            _ => Err(GatewayError::NotConnected),
        }
    }

    fn set_status(&self, status: ConnectionStatus) {
        let _transition = self.transition.lock();
        {
            let mut current = self.status.write();
            if *current == status {
                return;
            }
            *current = status;
        }
        info!(%status, "connection status changed");
        self.status_listeners.emit(&status);
    }

    fn teardown_link(&self) {
        let Some(link) = self.link.lock().take() else {
            return;
        };
        link.reader.abort();
        let _ = link.outbound.send(close_message());
    }

    fn cancel_reconnect(&self) {
        if let Some(token) = self.reconnect.lock().take() {
            token.cancel();
        }
    }

    // ── receive path ──

    fn handle_text(
        &self,
        text: &str,
        generation: u64,
        challenge: &mut Option<oneshot::Sender<ConnectChallenge>>,
    ) {
        if self.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        for line in text.split('\n').map(str::trim).filter(|line| !line.is_empty()) {
            match Frame::decode(line) {
                Ok(Frame::Response(response)) => {
                    let _ = self.correlator.resolve(response);
                }
                Ok(Frame::Event(event)) => self.handle_event(&event, challenge),
                Ok(Frame::Request(request)) => {
                    debug!(method = %request.method, "ignoring server-initiated request");
                }
                Err(err) => warn!(error = %err, "dropping undecodable frame"),
            }
        }
    }

    fn handle_event(
        &self,
        event: &EventFrame,
        challenge: &mut Option<oneshot::Sender<ConnectChallenge>>,
    ) {
        debug!(event = %event.event, seq = ?event.seq, "event received");
        if event.event == event_names::CONNECT_CHALLENGE && challenge.is_some() {
            match event.payload.clone().map(serde_json::from_value::<ConnectChallenge>) {
                Some(Ok(parsed)) => {
                    if let Some(tx) = challenge.take() {
                        let _ = tx.send(parsed);
                    }
                }
                _ => warn!("ignoring malformed connect challenge"),
            }
        }

        let now = Utc::now();
        match self.dispatcher.dispatch(event) {
            Route::System => {
                let _ = self.snapshot.write().apply_system_event(event, now);
            }
            Route::Domain => {
                let _ = self.state.apply_frame(event, now);
            }
        }
    }

    fn on_closed(self: &Arc<Self>, generation: u64, clean: bool) {
        let link = {
            let mut slot = self.link.lock();
            match slot.as_ref() {
                Some(link) if link.generation == generation => slot.take(),
                _ => None,
            }
        };
        let Some(link) = link else {
            return;
        };
        self.correlator.reject_all(&GatewayError::Disconnected);
        if !link.authenticated {
            // The handshake observes the failure through its own channels.
            return;
        }
        *self.hello.write() = None;
        info!(clean, "gateway connection closed");
        self.set_status(ConnectionStatus::Disconnected);
        if !clean && self.config.auto_reconnect {
            self.schedule_reconnect(generation);
        }
    }

    /// One reconnect attempt after the configured delay.
    fn schedule_reconnect(self: &Arc<Self>, generation: u64) {
        let token = CancellationToken::new();
        if let Some(previous) = self.reconnect.lock().replace(token.clone()) {
            previous.cancel();
        }
        let delay = self.config.reconnect_delay;
        let weak = Arc::downgrade(self);
        info!(delay_ms = millis(delay), "scheduling gateway reconnect");
        drop(tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    let Some(inner) = weak.upgrade() else {
                        return;
                    };
                    if inner.generation.load(Ordering::SeqCst) != generation {
                        return;
                    }
                    let client = GatewayClient { inner };
                    if let Err(err) = client.connect().await {
                        warn!(error = %err, "gateway reconnect failed");
                    }
                }
            }
        }));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Socket tasks
// ─────────────────────────────────────────────────────────────────────────────

#[instrument(skip_all, name = "gateway.recv", fields(generation = generation))]
async fn read_loop(
    inner: Arc<ClientInner>,
    mut stream: SplitStream<WsStream>,
    generation: u64,
    challenge: oneshot::Sender<ConnectChallenge>,
) {
    let mut challenge = Some(challenge);
    let mut clean = false;
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => inner.handle_text(text.as_str(), generation, &mut challenge),
            Ok(Message::Binary(bytes)) => match std::str::from_utf8(&bytes) {
                Ok(text) => inner.handle_text(text, generation, &mut challenge),
                Err(_) => warn!(len = bytes.len(), "dropping non-UTF-8 binary frame"),
            },
            Ok(Message::Close(frame)) => {
                clean = frame.as_ref().is_some_and(|f| f.code == CloseCode::Normal);
                debug!(code = ?frame.as_ref().map(|f| f.code), "gateway sent close");
                break;
            }
            Ok(_) => {}
            Err(err) => {
                warn!(error = %err, "gateway socket read failed");
                break;
            }
        }
    }
    inner.on_closed(generation, clean);
}

async fn write_loop(
    mut sink: SplitSink<WsStream, Message>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = outbound.recv().await {
        let closing = matches!(msg, Message::Close(_));
        if let Err(err) = sink.send(msg).await {
            debug!(error = %err, "gateway socket write failed");
            break;
        }
        if closing {
            break;
        }
    }
    let _ = sink.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn request_without_connection_is_rejected() {
        let client = GatewayClient::new(ClientConfig::new("ws://127.0.0.1:9"));
        assert_matches!(client.request("status", None).await, Err(GatewayError::NotConnected));
        assert_matches!(client.sessions_list().await, Err(GatewayError::NotConnected));
    }

    #[tokio::test]
    async fn connect_failure_reports_socket_error_and_status() {
        let mut config = ClientConfig::new("ws://127.0.0.1:9");
        config.handshake_timeout = Duration::from_secs(2);
        let client = GatewayClient::new(config);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let _handle = client.on_connection_change(move |status| s.lock().push(*status));

        let result = client.connect().await;
        assert!(result.is_err());
        assert_eq!(client.connection_status(), ConnectionStatus::Error);
        assert_eq!(
            *seen.lock(),
            vec![ConnectionStatus::Connecting, ConnectionStatus::Error]
        );
    }

    #[test]
    fn initial_state() {
        let client = GatewayClient::new(ClientConfig::default());
        assert_eq!(client.connection_status(), ConnectionStatus::Disconnected);
        assert!(!client.is_connected());
        assert!(client.hello().is_none());
        assert_eq!(client.pending_requests(), 0);
    }

    #[test]
    fn disconnect_when_idle_emits_nothing() {
        let client = GatewayClient::new(ClientConfig::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let _handle = client.on_connection_change(move |status| s.lock().push(*status));
        client.disconnect();
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn decode_reports_method() {
        let err = decode::<SessionsList>("sessions.list", Value::from(3)).unwrap_err();
        assert_matches!(err, GatewayError::Protocol(msg) if msg.contains("sessions.list"));
    }
}
