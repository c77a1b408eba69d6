//! End-to-end tests against an in-process mock Gateway.

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use clawdbot_core::{ConnectionState, GatewayError};
use clawdbot_gateway::{
    ClawdbotClient, ClientOptions, HistoryOptions, ListSessionsParams, ReconnectPolicy,
    connect_with_retry,
};

const TIMEOUT: Duration = Duration::from_secs(5);

/// Loopback WebSocket server handing each accepted connection to the test.
struct MockGateway {
    url: String,
    conns: mpsc::UnboundedReceiver<MockConn>,
}

/// One accepted client connection, seen from the Gateway side.
struct MockConn {
    frames: mpsc::UnboundedReceiver<Value>,
    replies: mpsc::UnboundedSender<Message>,
}

impl MockGateway {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (conn_tx, conns) = mpsc::unbounded_channel();

        drop(tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let Ok(ws) = accept_async(stream).await else {
                    continue;
                };
                let (frame_tx, frames) = mpsc::unbounded_channel();
                let (replies, mut reply_rx) = mpsc::unbounded_channel::<Message>();
                if conn_tx.send(MockConn { frames, replies }).is_err() {
                    return;
                }
                drop(tokio::spawn(async move {
                    let (mut tx, mut rx) = ws.split();
                    loop {
                        tokio::select! {
                            incoming = rx.next() => match incoming {
                                Some(Ok(Message::Text(text))) => {
                                    let value: Value = serde_json::from_str(text.as_str()).unwrap();
                                    let _ = frame_tx.send(value);
                                }
                                Some(Ok(_)) => {}
                                _ => break,
                            },
                            reply = reply_rx.recv() => match reply {
                                Some(message) => {
                                    let closing = matches!(message, Message::Close(_));
                                    if tx.send(message).await.is_err() || closing {
                                        break;
                                    }
                                }
                                None => break,
                            },
                        }
                    }
                }));
            }
        }));

        Self {
            url: format!("ws://{addr}"),
            conns,
        }
    }

    async fn accept(&mut self) -> MockConn {
        timeout(TIMEOUT, self.conns.recv())
            .await
            .expect("timeout waiting for connection")
            .expect("server stopped")
    }

    fn client(&self) -> ClawdbotClient {
        ClawdbotClient::new(ClientOptions::new(&self.url))
    }
}

impl MockConn {
    async fn next_call(&mut self) -> Value {
        timeout(TIMEOUT, self.frames.recv())
            .await
            .expect("timeout waiting for call")
            .expect("connection ended")
    }

    fn send(&self, value: Value) {
        self.replies.send(Message::text(value.to_string())).unwrap();
    }

    fn send_raw(&self, text: &str) {
        self.replies.send(Message::text(text)).unwrap();
    }

    fn reply(&self, call: &Value, result: Value) {
        self.send(json!({"jsonrpc": "2.0", "id": call["id"], "result": result}));
    }

    fn reply_error(&self, call: &Value, message: &str) {
        self.send(json!({
            "jsonrpc": "2.0",
            "id": call["id"],
            "error": {"code": -32000, "message": message}
        }));
    }

    fn close(&self) {
        self.replies.send(Message::Close(None)).unwrap();
    }
}

fn recording_states() -> (
    Arc<Mutex<Vec<ConnectionState>>>,
    impl Fn(ConnectionState) + Send + Sync + 'static,
) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    (seen, move |state| sink.lock().push(state))
}

// ── typed operations ────────────────────────────────────────────────────────

#[tokio::test]
async fn list_sessions_round_trip() {
    let mut gateway = MockGateway::start().await;
    let client = gateway.client();
    client.connect().await.unwrap();
    let mut conn = gateway.accept().await;

    let responder = tokio::spawn(async move {
        let call = conn.next_call().await;
        conn.reply(
            &call,
            json!([{"key": "s1", "kind": "chat", "model": "opus", "lastActivity": "2026-01-01T00:00:00Z"}]),
        );
        (call, conn)
    });

    let sessions = client
        .list_sessions(ListSessionsParams {
            limit: Some(10),
            message_limit: None,
        })
        .await
        .unwrap();
    let (call, _conn) = responder.await.unwrap();

    assert_eq!(call["jsonrpc"], "2.0");
    assert_eq!(call["id"], 1);
    assert_eq!(call["method"], "sessions.list");
    assert_eq!(call["params"], json!({"limit": 10}));
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].key, "s1");
    assert_eq!(sessions[0].model.as_deref(), Some("opus"));
    assert_eq!(client.pending_calls(), 0);
}

#[tokio::test]
async fn every_operation_uses_its_method_and_params() {
    let mut gateway = MockGateway::start().await;
    let client = gateway.client();
    client.connect().await.unwrap();
    let mut conn = gateway.accept().await;

    let responder = tokio::spawn(async move {
        let mut seen = Vec::new();
        for _ in 0..5 {
            let call = conn.next_call().await;
            let result = match call["method"].as_str().unwrap() {
                "status" => json!({"version": "1.2.3", "uptime": 12.5, "sessions": 3, "model": "opus"}),
                "sessions.history" => json!([{"role": "user", "content": "hi"}]),
                "cron.list" => json!([{"id": "c1", "schedule": "0 * * * *", "text": "ping", "enabled": false}]),
                _ => json!({"ok": true}),
            };
            conn.reply(&call, result);
            seen.push((call["method"].clone(), call["params"].clone()));
        }
        seen
    });

    let status = client.status().await.unwrap();
    assert_eq!(status.version, "1.2.3");
    assert_eq!(status.sessions, 3);

    let history = client
        .get_session_history(
            "main",
            HistoryOptions {
                limit: Some(20),
                include_tools: Some(false),
            },
        )
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].content, "hi");

    let sent = client.send_to_session("main", "hello").await.unwrap();
    assert_eq!(sent, json!({"ok": true}));

    let jobs = client.list_cron_jobs(true).await.unwrap();
    assert_eq!(jobs[0].id, "c1");
    assert!(!jobs[0].enabled);

    let ran = client.run_cron_job("c1").await.unwrap();
    assert_eq!(ran, json!({"ok": true}));

    let seen = responder.await.unwrap();
    assert_eq!(
        seen,
        vec![
            (json!("status"), json!({})),
            (
                json!("sessions.history"),
                json!({"sessionKey": "main", "limit": 20, "includeTools": false})
            ),
            (
                json!("sessions.send"),
                json!({"sessionKey": "main", "message": "hello"})
            ),
            (json!("cron.list"), json!({"includeDisabled": true})),
            (json!("cron.run"), json!({"jobId": "c1"})),
        ]
    );
}

#[tokio::test]
async fn token_is_merged_into_every_call() {
    let mut gateway = MockGateway::start().await;
    let client = ClawdbotClient::new(ClientOptions::new(&gateway.url).with_token("s3cret"));
    client.connect().await.unwrap();
    let mut conn = gateway.accept().await;

    let responder = tokio::spawn(async move {
        let first = conn.next_call().await;
        conn.reply(&first, json!(null));
        let second = conn.next_call().await;
        conn.reply(&second, json!([]));
        (first, second)
    });

    let _ = client.run_cron_job("nightly").await.unwrap();
    let _ = client.list_cron_jobs(false).await.unwrap();
    let (first, second) = responder.await.unwrap();

    assert_eq!(first["params"], json!({"jobId": "nightly", "token": "s3cret"}));
    assert_eq!(
        second["params"],
        json!({"includeDisabled": false, "token": "s3cret"})
    );
}

#[tokio::test]
async fn result_of_wrong_shape_is_invalid_result() {
    let mut gateway = MockGateway::start().await;
    let client = gateway.client();
    client.connect().await.unwrap();
    let mut conn = gateway.accept().await;

    let responder = tokio::spawn(async move {
        let call = conn.next_call().await;
        conn.reply(&call, json!("not a list"));
        conn
    });

    let err = client
        .list_sessions(ListSessionsParams::default())
        .await
        .unwrap_err();
    let _conn = responder.await.unwrap();
    assert_matches!(err, GatewayError::InvalidResult { ref method, .. } if method == "sessions.list");
}

// ── correlation ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn out_of_order_responses_reach_their_callers() {
    let mut gateway = MockGateway::start().await;
    let client = gateway.client();
    client.connect().await.unwrap();
    let mut conn = gateway.accept().await;

    let responder = tokio::spawn(async move {
        let a = conn.next_call().await;
        let b = conn.next_call().await;
        conn.reply(&b, json!({"answer": "second"}));
        conn.reply(&a, json!({"answer": "first"}));
        conn
    });

    let (a, b) = tokio::join!(
        client.call("first.method", json!({})),
        client.call("second.method", json!({}))
    );
    let _conn = responder.await.unwrap();

    assert_eq!(a.unwrap(), json!({"answer": "first"}));
    assert_eq!(b.unwrap(), json!({"answer": "second"}));
}

#[tokio::test]
async fn server_error_rejects_with_its_message() {
    let mut gateway = MockGateway::start().await;
    let client = gateway.client();
    client.connect().await.unwrap();
    let mut conn = gateway.accept().await;

    let responder = tokio::spawn(async move {
        let call = conn.next_call().await;
        conn.reply_error(&call, "Method not found");
        let call = conn.next_call().await;
        conn.send(json!({"jsonrpc": "2.0", "id": call["id"], "error": {"code": 1}}));
        conn
    });

    let err = client.call("nope", json!({})).await.unwrap_err();
    assert_matches!(err, GatewayError::Rpc { ref message } if message == "Method not found");
    let err = client.call("nope", json!({})).await.unwrap_err();
    assert_matches!(err, GatewayError::Rpc { ref message } if message == "RPC error");
    let _conn = responder.await.unwrap();
}

#[tokio::test]
async fn malformed_frames_do_not_disturb_pending_calls() {
    let mut gateway = MockGateway::start().await;
    let client = gateway.client();
    client.connect().await.unwrap();
    let mut conn = gateway.accept().await;

    let responder = tokio::spawn(async move {
        let call = conn.next_call().await;
        conn.send_raw("this is not json");
        conn.send_raw("[1, 2, 3]");
        conn.reply(&call, json!("ok"));
        conn
    });

    let result = client.call("status", json!({})).await.unwrap();
    let _conn = responder.await.unwrap();
    assert_eq!(result, json!("ok"));
    assert_eq!(client.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn call_times_out_and_late_reply_is_ignored() {
    let mut gateway = MockGateway::start().await;
    let client = ClawdbotClient::new(
        ClientOptions::new(&gateway.url).with_request_timeout(Duration::from_millis(100)),
    );
    client.connect().await.unwrap();
    let mut conn = gateway.accept().await;

    let err = client.call("slow", json!({})).await.unwrap_err();
    assert_matches!(err, GatewayError::Timeout { id: 1, ref method, timeout_ms: 100 } if method == "slow");
    assert!(err.is_timeout());
    assert_eq!(client.pending_calls(), 0);

    // The late reply must not settle the next call.
    let call = conn.next_call().await;
    conn.reply(&call, json!("late"));
    let responder = tokio::spawn(async move {
        let call = conn.next_call().await;
        conn.reply(&call, json!("fresh"));
        conn
    });
    let result = client.call("fast", json!({})).await.unwrap();
    let _conn = responder.await.unwrap();
    assert_eq!(result, json!("fresh"));
}

// ── observer ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn observer_sees_pushes_and_responses() {
    let mut gateway = MockGateway::start().await;
    let (observed_tx, mut observed) = mpsc::unbounded_channel();
    let client = ClawdbotClient::new(ClientOptions::new(&gateway.url).on_message(move |frame| {
        let _ = observed_tx.send(frame.clone());
    }));
    client.connect().await.unwrap();
    let mut conn = gateway.accept().await;

    let push = json!({"jsonrpc": "2.0", "method": "session.updated", "params": {"key": "s1"}});
    conn.send(push.clone());
    let seen = timeout(TIMEOUT, observed.recv()).await.unwrap().unwrap();
    assert_eq!(seen, push);

    let responder = tokio::spawn(async move {
        let call = conn.next_call().await;
        conn.reply(&call, json!(42));
        conn
    });
    assert_eq!(client.call("status", json!({})).await.unwrap(), json!(42));
    let _conn = responder.await.unwrap();

    let seen = timeout(TIMEOUT, observed.recv()).await.unwrap().unwrap();
    assert_eq!(seen["result"], 42);
}

// ── lifecycle ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn call_while_disconnected_sends_nothing() {
    let mut gateway = MockGateway::start().await;
    let client = gateway.client();

    let err = client.run_cron_job("job-1").await.unwrap_err();
    assert_matches!(err, GatewayError::NotConnected);
    assert_eq!(client.pending_calls(), 0);
    assert!(gateway.conns.try_recv().is_err());
}

#[tokio::test]
async fn state_sequence_for_connect_and_disconnect() {
    let mut gateway = MockGateway::start().await;
    let (seen, observer) = recording_states();
    let client = ClawdbotClient::new(ClientOptions::new(&gateway.url).on_state_change(observer));

    client.connect().await.unwrap();
    let _conn = gateway.accept().await;
    client.disconnect();
    client.disconnect();

    assert_eq!(
        *seen.lock(),
        vec![
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Disconnected,
        ]
    );
}

#[tokio::test]
async fn connect_while_connected_is_a_caller_error() {
    let mut gateway = MockGateway::start().await;
    let client = gateway.client();
    client.connect().await.unwrap();
    let _conn = gateway.accept().await;

    let err = client.connect().await.unwrap_err();
    assert_matches!(err, GatewayError::InvalidState { state: ConnectionState::Connected });
    assert_eq!(client.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn server_close_rejects_pending_calls() {
    let mut gateway = MockGateway::start().await;
    let (seen, observer) = recording_states();
    let client = Arc::new(ClawdbotClient::new(
        ClientOptions::new(&gateway.url).on_state_change(observer),
    ));
    client.connect().await.unwrap();
    let mut conn = gateway.accept().await;

    let caller = client.clone();
    let pending = tokio::spawn(async move { caller.status().await });
    let _call = conn.next_call().await;
    conn.close();

    let err = timeout(TIMEOUT, pending).await.unwrap().unwrap().unwrap_err();
    assert_matches!(err, GatewayError::ConnectionClosed { .. });
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(client.pending_calls(), 0);
    assert_eq!(
        seen.lock().last().copied(),
        Some(ConnectionState::Disconnected)
    );
}

#[tokio::test]
async fn transport_error_moves_to_error_and_rejects_pending_calls() {
    let mut gateway = MockGateway::start().await;
    let (seen, observer) = recording_states();
    let client = Arc::new(ClawdbotClient::new(
        ClientOptions::new(&gateway.url).on_state_change(observer),
    ));
    client.connect().await.unwrap();
    let mut conn = gateway.accept().await;

    let caller = client.clone();
    let pending = tokio::spawn(async move { caller.status().await });
    let _call = conn.next_call().await;
    // Dropping the handle tears the socket down without a close frame.
    drop(conn);

    let err = timeout(TIMEOUT, pending).await.unwrap().unwrap().unwrap_err();
    assert_matches!(err, GatewayError::ConnectionClosed { .. });
    assert_eq!(client.state(), ConnectionState::Error);
    assert_eq!(client.pending_calls(), 0);
    assert_eq!(
        *seen.lock(),
        vec![
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Error,
        ]
    );

    // `error` is a valid starting point for a fresh connect.
    client.connect().await.unwrap();
    let _conn = gateway.accept().await;
    assert_eq!(client.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn disconnect_during_handshake_cancels_connect() {
    // Accepts TCP but only answers the WebSocket handshake when told to.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let (accepted_tx, accepted) = tokio::sync::oneshot::channel();
    let (release_tx, release) = tokio::sync::oneshot::channel::<()>();
    drop(tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let _ = accepted_tx.send(());
        let _ = release.await;
        let Ok(mut ws) = accept_async(stream).await else {
            return;
        };
        while let Some(Ok(_)) = ws.next().await {}
    }));

    let (seen, observer) = recording_states();
    let client = Arc::new(ClawdbotClient::new(
        ClientOptions::new(url).on_state_change(observer),
    ));
    let connecting = client.clone();
    let attempt = tokio::spawn(async move { connecting.connect().await });

    timeout(TIMEOUT, accepted).await.unwrap().unwrap();
    assert_eq!(client.state(), ConnectionState::Connecting);

    let err = client.connect().await.unwrap_err();
    assert_matches!(err, GatewayError::InvalidState { state: ConnectionState::Connecting });

    client.disconnect();
    assert_eq!(client.state(), ConnectionState::Disconnected);
    release_tx.send(()).unwrap();

    let err = timeout(TIMEOUT, attempt).await.unwrap().unwrap().unwrap_err();
    assert_matches!(err, GatewayError::ConnectFailed { ref reason, .. } if reason.contains("disconnect"));
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(
        *seen.lock(),
        vec![ConnectionState::Connecting, ConnectionState::Disconnected]
    );
}

#[tokio::test]
async fn disconnect_rejects_pending_calls() {
    let mut gateway = MockGateway::start().await;
    let client = Arc::new(gateway.client());
    client.connect().await.unwrap();
    let mut conn = gateway.accept().await;

    let caller = client.clone();
    let pending = tokio::spawn(async move { caller.call("status", json!({})).await });
    let _call = conn.next_call().await;
    client.disconnect();

    let err = timeout(TIMEOUT, pending).await.unwrap().unwrap().unwrap_err();
    assert_matches!(err, GatewayError::ConnectionClosed { .. });
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn reconnect_after_close_keeps_ids_increasing() {
    let mut gateway = MockGateway::start().await;
    let client = gateway.client();
    let mut states = client.subscribe_state();
    client.connect().await.unwrap();
    let mut conn = gateway.accept().await;

    let responder = tokio::spawn(async move {
        let call = conn.next_call().await;
        conn.reply(&call, json!(1));
        conn.close();
        call
    });
    let _ = client.call("status", json!({})).await.unwrap();
    let first = responder.await.unwrap();

    loop {
        let state = timeout(TIMEOUT, states.recv()).await.unwrap().unwrap();
        if state == ConnectionState::Disconnected {
            break;
        }
    }

    client.connect().await.unwrap();
    let mut conn = gateway.accept().await;
    let responder = tokio::spawn(async move {
        let call = conn.next_call().await;
        conn.reply(&call, json!(2));
        call
    });
    assert_eq!(client.call("status", json!({})).await.unwrap(), json!(2));
    let second = responder.await.unwrap();

    assert_eq!(first["id"], 1);
    assert_eq!(second["id"], 2);
}

// ── reconnect helper ────────────────────────────────────────────────────────

#[tokio::test]
async fn connect_with_retry_gives_up_after_max_retries() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    drop(listener);

    let (seen, observer) = recording_states();
    let client = ClawdbotClient::new(ClientOptions::new(url).on_state_change(observer));
    let policy = ReconnectPolicy {
        max_retries: 2,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        jitter_factor: 0.0,
    };

    let err = connect_with_retry(&client, &policy).await.unwrap_err();
    assert_matches!(err, GatewayError::ConnectFailed { .. });
    assert_eq!(client.state(), ConnectionState::Error);
    let connecting = seen
        .lock()
        .iter()
        .filter(|s| **s == ConnectionState::Connecting)
        .count();
    assert_eq!(connecting, 3);
}

#[tokio::test]
async fn connect_with_retry_does_not_retry_caller_errors() {
    let mut gateway = MockGateway::start().await;
    let client = gateway.client();
    assert_eq!(
        connect_with_retry(&client, &ReconnectPolicy::default())
            .await
            .unwrap(),
        0
    );
    let _conn = gateway.accept().await;

    let err = connect_with_retry(&client, &ReconnectPolicy::default())
        .await
        .unwrap_err();
    assert_matches!(err, GatewayError::InvalidState { .. });
}
