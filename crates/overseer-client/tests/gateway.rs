//! End-to-end tests against an in-process stub gateway.

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{WebSocketStream, accept_async};

use overseer_client::{ClientConfig, ConnectionStatus, GatewayClient, GatewayError};
use overseer_state::{ActionKind, SessionStatus};

const TIMEOUT: Duration = Duration::from_secs(5);

// ── stub gateway ──

/// Server side of one accepted connection.
struct ServerConn {
    ws: WebSocketStream<TcpStream>,
}

impl ServerConn {
    async fn send(&mut self, frame: Value) {
        self.ws.send(Message::Text(frame.to_string().into())).await.unwrap();
    }

    async fn send_raw(&mut self, text: &str) {
        self.ws.send(Message::Text(text.to_string().into())).await.unwrap();
    }

    /// Next JSON frame from the client.
    async fn recv(&mut self) -> Value {
        loop {
            let msg = timeout(TIMEOUT, self.ws.next())
                .await
                .expect("timed out waiting for client frame")
                .expect("client closed")
                .unwrap();
            if let Message::Text(text) = msg {
                return serde_json::from_str(text.as_str()).unwrap();
            }
        }
    }

    async fn challenge(&mut self) {
        self.send(json!({
            "type": "event",
            "event": "connect.challenge",
            "payload": {"nonce": "abc123", "ts": 1}
        }))
        .await;
    }

    /// Full happy-path handshake. Returns the connect request.
    async fn handshake(&mut self) -> Value {
        self.challenge().await;
        let request = self.recv().await;
        assert_eq!(request["method"], "connect");
        self.respond(&request, hello_ok()).await;
        request
    }

    async fn respond(&mut self, request: &Value, payload: Value) {
        self.send(json!({"type": "res", "id": request["id"], "ok": true, "payload": payload}))
            .await;
    }

    async fn fail(&mut self, request: &Value, code: &str, message: &str) {
        self.send(json!({
            "type": "res",
            "id": request["id"],
            "ok": false,
            "error": {"code": code, "message": message}
        }))
        .await;
    }

    async fn event(&mut self, name: &str, payload: Value) {
        self.send(json!({"type": "event", "event": name, "payload": payload})).await;
    }

    async fn close_normally(mut self) {
        self.ws
            .close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: "bye".into(),
            }))
            .await
            .unwrap();
        // Drain until the client acknowledges the close.
        while let Ok(Some(Ok(_))) = timeout(TIMEOUT, self.ws.next()).await {}
    }
}

fn hello_ok() -> Value {
    json!({
        "type": "hello-ok",
        "protocol": 3,
        "server": {"version": "2026.2.1", "connId": "c-1"},
        "snapshot": {"presence": [{"host": "gw"}], "health": {"ok": true}},
        "features": {"methods": ["sessions.list", "chat.history"], "events": ["chat", "agent"]}
    })
}

/// Boot a stub gateway and return its URL plus the stream of accepted
/// connections.
async fn boot_gateway() -> (String, mpsc::UnboundedReceiver<ServerConn>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let (tx, rx) = mpsc::unbounded_channel();
    let _accept = tokio::spawn(async move {
        while let Ok((tcp, _)) = listener.accept().await {
            let Ok(ws) = accept_async(tcp).await else {
                continue;
            };
            if tx.send(ServerConn { ws }).is_err() {
                break;
            }
        }
    });
    (url, rx)
}

async fn next_conn(rx: &mut mpsc::UnboundedReceiver<ServerConn>) -> ServerConn {
    timeout(TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for connection")
        .expect("acceptor stopped")
}

fn config(url: &str) -> ClientConfig {
    let mut config = ClientConfig::new(url);
    config.token = Some("T".into());
    config.handshake_timeout = Duration::from_secs(2);
    config.request_timeout = Duration::from_secs(2);
    config.reconnect_delay = Duration::from_millis(50);
    config
}

fn record_statuses(client: &GatewayClient) -> Arc<Mutex<Vec<String>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = Arc::clone(&seen);
    let _handle = client.on_connection_change(move |status| s.lock().push(status.to_string()));
    seen
}

/// Connect `client` against the next stub connection.
async fn connect(
    client: &GatewayClient,
    rx: &mut mpsc::UnboundedReceiver<ServerConn>,
) -> ServerConn {
    let c = client.clone();
    let connecting = tokio::spawn(async move { c.connect().await });
    let mut conn = next_conn(rx).await;
    let _ = conn.handshake().await;
    let _hello = timeout(TIMEOUT, connecting).await.unwrap().unwrap().unwrap();
    conn
}

async fn eventually(mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ── handshake ──

#[tokio::test]
async fn handshake_end_to_end() {
    let (url, mut rx) = boot_gateway().await;
    let client = GatewayClient::new(config(&url));
    let statuses = record_statuses(&client);

    let c = client.clone();
    let connecting = tokio::spawn(async move { c.connect().await });
    let mut conn = next_conn(&mut rx).await;
    let request = conn.handshake().await;

    assert_eq!(request["type"], "req");
    assert_eq!(request["params"]["auth"]["token"], "T");
    assert_eq!(request["params"]["minProtocol"], 3);
    assert_eq!(request["params"]["maxProtocol"], 3);
    assert_eq!(request["params"]["client"]["id"], "overseer");

    let hello = timeout(TIMEOUT, connecting).await.unwrap().unwrap().unwrap();
    assert_eq!(hello.protocol, 3);
    assert_eq!(hello.server.conn_id, "c-1");
    assert!(client.is_connected());
    assert_eq!(*statuses.lock(), vec!["connecting", "connected"]);
    assert_eq!(client.snapshot().presence, vec![json!({"host": "gw"})]);
}

#[tokio::test]
async fn concurrent_connects_share_one_socket() {
    let (url, mut rx) = boot_gateway().await;
    let client = GatewayClient::new(config(&url));

    let first = {
        let c = client.clone();
        tokio::spawn(async move { c.connect().await })
    };
    let second = {
        let c = client.clone();
        tokio::spawn(async move { c.connect().await })
    };
    let mut conn = next_conn(&mut rx).await;
    let _ = conn.handshake().await;

    let a = timeout(TIMEOUT, first).await.unwrap().unwrap().unwrap();
    let b = timeout(TIMEOUT, second).await.unwrap().unwrap().unwrap();
    assert_eq!(a, b);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn connect_while_connected_returns_existing_hello() {
    let (url, mut rx) = boot_gateway().await;
    let client = GatewayClient::new(config(&url));
    let _conn = connect(&client, &mut rx).await;

    let again = timeout(TIMEOUT, client.connect()).await.unwrap().unwrap();
    assert_eq!(again.server.conn_id, "c-1");
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn rejected_handshake_sets_error() {
    let (url, mut rx) = boot_gateway().await;
    let client = GatewayClient::new(config(&url));
    let statuses = record_statuses(&client);

    let c = client.clone();
    let connecting = tokio::spawn(async move { c.connect().await });
    let mut conn = next_conn(&mut rx).await;
    conn.challenge().await;
    let request = conn.recv().await;
    conn.fail(&request, "UNAUTHORIZED", "invalid token").await;

    let result = timeout(TIMEOUT, connecting).await.unwrap().unwrap();
    assert_matches!(result, Err(GatewayError::Handshake { reason }) if reason == "invalid token");
    assert_eq!(client.connection_status(), ConnectionStatus::Error);
    assert_eq!(*statuses.lock(), vec!["connecting", "error"]);
}

#[tokio::test]
async fn wrong_protocol_is_rejected() {
    let (url, mut rx) = boot_gateway().await;
    let client = GatewayClient::new(config(&url));

    let c = client.clone();
    let connecting = tokio::spawn(async move { c.connect().await });
    let mut conn = next_conn(&mut rx).await;
    conn.challenge().await;
    let request = conn.recv().await;
    conn.respond(&request, json!({"type": "hello-ok", "protocol": 2})).await;

    let result = timeout(TIMEOUT, connecting).await.unwrap().unwrap();
    assert_matches!(result, Err(GatewayError::Protocol(_)));
    assert!(!client.is_connected());
}

#[tokio::test]
async fn missing_challenge_times_out() {
    let (url, mut rx) = boot_gateway().await;
    let mut cfg = config(&url);
    cfg.handshake_timeout = Duration::from_millis(200);
    let client = GatewayClient::new(cfg);

    let c = client.clone();
    let connecting = tokio::spawn(async move { c.connect().await });
    let _conn = next_conn(&mut rx).await;

    let result = timeout(TIMEOUT, connecting).await.unwrap().unwrap();
    assert_matches!(result, Err(GatewayError::HandshakeTimeout { timeout_ms: 200 }));
    assert_eq!(client.connection_status(), ConnectionStatus::Error);
}

#[tokio::test]
async fn connect_to_overrides_target() {
    let (url, mut rx) = boot_gateway().await;
    let client = GatewayClient::new(ClientConfig::new("ws://127.0.0.1:9"));

    let c = client.clone();
    let target = url.clone();
    let connecting =
        tokio::spawn(async move { c.connect_to(target, Some("other".into())).await });
    let mut conn = next_conn(&mut rx).await;
    let request = conn.handshake().await;
    assert_eq!(request["params"]["auth"]["token"], "other");
    assert!(timeout(TIMEOUT, connecting).await.unwrap().unwrap().is_ok());
}

// ── requests ──

#[tokio::test]
async fn out_of_order_responses() {
    let (url, mut rx) = boot_gateway().await;
    let client = GatewayClient::new(config(&url));
    let mut conn = connect(&client, &mut rx).await;

    let a = {
        let c = client.clone();
        tokio::spawn(async move { c.request("status", None).await })
    };
    let first = conn.recv().await;
    let b = {
        let c = client.clone();
        tokio::spawn(async move { c.request("usage.cost", None).await })
    };
    let second = conn.recv().await;
    assert_ne!(first["id"], second["id"]);

    conn.respond(&second, json!({"cost": 1.5})).await;
    conn.respond(&first, json!({"uptime": 10})).await;

    assert_eq!(timeout(TIMEOUT, a).await.unwrap().unwrap().unwrap(), json!({"uptime": 10}));
    assert_eq!(timeout(TIMEOUT, b).await.unwrap().unwrap().unwrap(), json!({"cost": 1.5}));
    assert_eq!(client.pending_requests(), 0);
}

#[tokio::test]
async fn late_response_after_timeout_is_ignored() {
    let (url, mut rx) = boot_gateway().await;
    let mut cfg = config(&url);
    cfg.request_timeout = Duration::from_millis(100);
    let client = GatewayClient::new(cfg);
    let mut conn = connect(&client, &mut rx).await;

    let call = {
        let c = client.clone();
        tokio::spawn(async move { c.request("status", None).await })
    };
    let request = conn.recv().await;
    let result = timeout(TIMEOUT, call).await.unwrap().unwrap();
    assert_matches!(result, Err(GatewayError::RequestTimeout { method, timeout_ms: 100 }) if method == "status");
    assert_eq!(client.pending_requests(), 0);

    conn.respond(&request, json!({"late": true})).await;

    let call = {
        let c = client.clone();
        tokio::spawn(async move { c.request("status", None).await })
    };
    let request = conn.recv().await;
    conn.respond(&request, json!({"fresh": true})).await;
    assert_eq!(timeout(TIMEOUT, call).await.unwrap().unwrap().unwrap(), json!({"fresh": true}));
    assert!(client.is_connected());
}

#[tokio::test]
async fn error_response_surfaces_code_and_message() {
    let (url, mut rx) = boot_gateway().await;
    let client = GatewayClient::new(config(&url));
    let mut conn = connect(&client, &mut rx).await;

    let call = {
        let c = client.clone();
        tokio::spawn(async move { c.chat_history("agent:main:discord:dm:bob", Some(5)).await })
    };
    let request = conn.recv().await;
    assert_eq!(request["method"], "chat.history");
    assert_eq!(request["params"], json!({"sessionKey": "agent:main:discord:dm:bob", "limit": 5}));
    conn.fail(&request, "NOT_FOUND", "no such session").await;

    let result = timeout(TIMEOUT, call).await.unwrap().unwrap();
    assert_matches!(result, Err(GatewayError::Rpc { code, .. }) if code == "NOT_FOUND");
}

#[tokio::test]
async fn refresh_sessions_reconciles_listing() {
    let (url, mut rx) = boot_gateway().await;
    let client = GatewayClient::new(config(&url));
    let mut conn = connect(&client, &mut rx).await;

    let call = {
        let c = client.clone();
        tokio::spawn(async move { c.refresh_sessions().await })
    };
    let request = conn.recv().await;
    assert_eq!(request["method"], "sessions.list");
    let now_ms = chrono::Utc::now().timestamp_millis();
    conn.respond(
        &request,
        json!({"sessions": [
            {"key": "agent:main:discord:channel:1", "updatedAt": now_ms, "totalTokens": 10},
            {"key": "agent:main:telegram:dm:alice", "updatedAt": now_ms - 86_400_000, "abortedLastRun": true}
        ]}),
    )
    .await;

    assert_eq!(timeout(TIMEOUT, call).await.unwrap().unwrap().unwrap(), 2);
    let state = client.state();
    assert_eq!(state.sessions().len(), 2);
    assert_eq!(
        state.session("agent:main:telegram:dm:alice").unwrap().status,
        SessionStatus::Error
    );
}

// ── events ──

#[tokio::test]
async fn chat_events_fold_into_one_action() {
    let (url, mut rx) = boot_gateway().await;
    let client = GatewayClient::new(config(&url));
    let mut conn = connect(&client, &mut rx).await;
    let session = "agent:main:discord:channel:1";

    for (seq, state, text) in [(1, "delta", "Hel"), (2, "delta", "Hello"), (3, "final", "Hello!")] {
        conn.event(
            "chat",
            json!({
                "runId": "r1",
                "sessionKey": session,
                "seq": seq,
                "state": state,
                "message": {"role": "assistant", "content": [{"type": "text", "text": text}]},
                "usage": {"input": 3, "output": 2, "total": 5}
            }),
        )
        .await;
    }

    let state = Arc::clone(client.state());
    eventually(|| state.action("r1").is_some_and(|a| a.kind == ActionKind::Complete)).await;
    let actions = state.actions();
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].content.as_deref(), Some("Hello!"));
    assert_eq!(actions[0].usage.as_ref().map(|u| u.total_tokens), Some(5));
    assert_eq!(state.session(session).unwrap().status, SessionStatus::Active);
}

#[tokio::test]
async fn system_events_update_snapshot_only() {
    let (url, mut rx) = boot_gateway().await;
    let client = GatewayClient::new(config(&url));
    let mut conn = connect(&client, &mut rx).await;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = Arc::clone(&seen);
    let _handle = client.on_event(move |frame| s.lock().push(frame.event.clone()));

    conn.event("health", json!({"ok": false})).await;
    conn.event("tick", json!({"ts": 2})).await;

    let c = client.clone();
    eventually(move || c.snapshot().last_tick.is_some()).await;
    assert_eq!(client.snapshot().health, json!({"ok": false}));
    assert!(client.state().sessions().is_empty());
    assert_eq!(*seen.lock(), vec!["health".to_string(), "tick".to_string()]);
}

#[tokio::test]
async fn multiple_frames_in_one_message() {
    let (url, mut rx) = boot_gateway().await;
    let client = GatewayClient::new(config(&url));
    let mut conn = connect(&client, &mut rx).await;

    let batch = [
        json!({"type": "event", "event": "exec.started", "payload": {"runId": "r9", "pid": 42, "command": "ls"}}),
        json!({"type": "event", "event": "exec.output", "payload": {"runId": "r9", "pid": 42, "output": "a\n"}}),
    ]
    .iter()
    .map(Value::to_string)
    .collect::<Vec<_>>()
    .join("\n");
    conn.send_raw(&format!("{batch}\n\nnot json\n")).await;

    let state = Arc::clone(client.state());
    eventually(|| state.processes().iter().any(|p| p.output.total_chars() > 0)).await;
    let processes = state.processes();
    let process = &processes[0];
    assert_eq!(process.pid, Some(42));
    assert!(process.is_running());
    assert!(client.is_connected());
}

// ── lifecycle ──

#[tokio::test]
async fn abnormal_close_rejects_pending_and_reconnects() {
    let (url, mut rx) = boot_gateway().await;
    let client = GatewayClient::new(config(&url));
    let statuses = record_statuses(&client);
    let mut conn = connect(&client, &mut rx).await;

    let call = {
        let c = client.clone();
        tokio::spawn(async move { c.request("status", None).await })
    };
    let _ = conn.recv().await;
    drop(conn);

    let result = timeout(TIMEOUT, call).await.unwrap().unwrap();
    assert_matches!(result, Err(GatewayError::Disconnected));

    let mut conn = next_conn(&mut rx).await;
    let _ = conn.handshake().await;
    let c = client.clone();
    eventually(move || c.is_connected()).await;
    assert_eq!(
        *statuses.lock(),
        vec!["connecting", "connected", "disconnected", "connecting", "connected"]
    );
}

#[tokio::test]
async fn failed_reconnect_is_not_retried() {
    let (url, mut rx) = boot_gateway().await;
    let client = GatewayClient::new(config(&url));
    let statuses = record_statuses(&client);
    let conn = connect(&client, &mut rx).await;
    drop(conn);

    let mut retry = next_conn(&mut rx).await;
    retry.challenge().await;
    let request = retry.recv().await;
    retry.fail(&request, "UNAUTHORIZED", "token revoked").await;

    let c = client.clone();
    eventually(move || c.connection_status() == ConnectionStatus::Error).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(rx.try_recv().is_err());
    assert_eq!(
        *statuses.lock(),
        vec!["connecting", "connected", "disconnected", "connecting", "error"]
    );
}

#[tokio::test]
async fn manual_connect_supersedes_scheduled_reconnect() {
    let (url, mut rx) = boot_gateway().await;
    let mut cfg = config(&url);
    cfg.reconnect_delay = Duration::from_millis(300);
    let client = GatewayClient::new(cfg);
    let conn = connect(&client, &mut rx).await;
    drop(conn);

    let c = client.clone();
    eventually(move || c.connection_status() == ConnectionStatus::Disconnected).await;
    let _conn = connect(&client, &mut rx).await;

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(rx.try_recv().is_err());
    assert!(client.is_connected());
}

#[tokio::test]
async fn disconnect_cancels_scheduled_reconnect() {
    let (url, mut rx) = boot_gateway().await;
    let mut cfg = config(&url);
    cfg.reconnect_delay = Duration::from_millis(300);
    let client = GatewayClient::new(cfg);
    let conn = connect(&client, &mut rx).await;
    drop(conn);

    let c = client.clone();
    eventually(move || c.connection_status() == ConnectionStatus::Disconnected).await;
    client.disconnect();

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(rx.try_recv().is_err());
    assert_eq!(client.connection_status(), ConnectionStatus::Disconnected);
}

#[tokio::test]
async fn connect_after_disconnect_mid_handshake_opens_fresh_socket() {
    let (url, mut rx) = boot_gateway().await;
    let client = GatewayClient::new(config(&url));
    let statuses = record_statuses(&client);

    let first = {
        let c = client.clone();
        tokio::spawn(async move { c.connect().await })
    };
    let _abandoned = next_conn(&mut rx).await;
    client.disconnect();
    assert!(timeout(TIMEOUT, first).await.unwrap().unwrap().is_err());

    let _conn = connect(&client, &mut rx).await;
    assert!(client.is_connected());
    assert_eq!(
        *statuses.lock(),
        vec!["connecting", "disconnected", "connecting", "connected"]
    );
}

#[tokio::test]
async fn normal_close_does_not_reconnect() {
    let (url, mut rx) = boot_gateway().await;
    let client = GatewayClient::new(config(&url));
    let conn = connect(&client, &mut rx).await;

    conn.close_normally().await;
    let c = client.clone();
    eventually(move || c.connection_status() == ConnectionStatus::Disconnected).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn reconnect_can_be_disabled() {
    let (url, mut rx) = boot_gateway().await;
    let mut cfg = config(&url);
    cfg.auto_reconnect = false;
    let client = GatewayClient::new(cfg);
    let conn = connect(&client, &mut rx).await;

    drop(conn);
    let c = client.clone();
    eventually(move || c.connection_status() == ConnectionStatus::Disconnected).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn client_disconnect_rejects_pending() {
    let (url, mut rx) = boot_gateway().await;
    let client = GatewayClient::new(config(&url));
    let mut conn = connect(&client, &mut rx).await;

    let call = {
        let c = client.clone();
        tokio::spawn(async move { c.request("status", None).await })
    };
    let _ = conn.recv().await;
    client.disconnect();

    let result = timeout(TIMEOUT, call).await.unwrap().unwrap();
    assert_matches!(result, Err(GatewayError::Disconnected));
    assert_eq!(client.connection_status(), ConnectionStatus::Disconnected);
    assert!(client.hello().is_none());
    assert_matches!(client.request("status", None).await, Err(GatewayError::NotConnected));

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn connect_logs_lifecycle() {
    let (logs, _guard) = overseer_logging::capture_logs();
    let (url, mut rx) = boot_gateway().await;
    let client = GatewayClient::new(config(&url));
    let _conn = connect(&client, &mut rx).await;

    assert!(logs.has_event(tracing::Level::INFO, "gateway connected"));
    assert!(logs.has_event(tracing::Level::INFO, "connection status changed"));
    assert!(logs.has_span("gateway.connect"));
}
