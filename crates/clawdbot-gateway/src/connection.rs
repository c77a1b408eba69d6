//! Connection lifecycle and the WebSocket transport task.
//!
//! State graph:
//!
//! ```text
//! disconnected ──connect()──▶ connecting ──open──▶ connected
//!       ▲                      │    │                │  │
//!       │                      │    └──fail──▶ error ◀──┘ (transport error)
//!       └──────── close / disconnect() ◀───────────────┘
//! error ──connect()──▶ connecting
//! ```
//!
//! Every transition runs under one lock and fires the observer exactly once,
//! synchronously, before the lock is released. Observers must not call
//! `connect()`/`disconnect()` from inside the callback.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use clawdbot_core::{ConnectionState, GatewayError};
use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::correlator::FrameSink;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Observer fired synchronously on every state transition.
pub type StateObserver = Arc<dyn Fn(ConnectionState) + Send + Sync>;

/// Default deadline for establishing the WebSocket.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default number of frames buffered towards the socket.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// Capacity of the state broadcast channel.
const STATE_CHANNEL_CAPACITY: usize = 64;

/// Receives what the transport task reads off the socket.
pub trait InboundHandler: Send + Sync {
    /// A text frame arrived.
    fn on_frame(&self, frame: &str);

    /// The open transport ended on its own (close or error).
    fn on_transport_lost(&self, reason: &str);
}

/// Transport tuning.
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// Gateway WebSocket URL.
    pub url: String,
    /// Deadline for the WebSocket handshake.
    pub connect_timeout: Duration,
    /// Frames buffered towards the socket before sends are refused.
    pub outbound_capacity: usize,
}

/// How the transport task ended.
#[derive(Debug)]
enum TransportEnd {
    /// Peer closed or the stream ended.
    Closed(String),
    /// Read or write failed.
    Failed(String),
    /// Stopped by `disconnect()`.
    Cancelled,
}

/// The live socket of one successful `connect()`.
struct Link {
    outbound: mpsc::Sender<String>,
    cancel: CancellationToken,
    _task: JoinHandle<()>,
}

/// Owns the transport and the lifecycle state machine.
pub struct ConnectionManager {
    config: ConnectionConfig,
    state: RwLock<ConnectionState>,
    transitions: Mutex<()>,
    observer: Option<StateObserver>,
    events: broadcast::Sender<ConnectionState>,
    link: Mutex<Option<Link>>,
    /// Bumped by every connect and disconnect; stale transport tasks compare
    /// against it and stand down.
    generation: AtomicU64,
}

impl ConnectionManager {
    /// Create a manager in the `disconnected` state.
    pub fn new(config: ConnectionConfig, observer: Option<StateObserver>) -> Self {
        let (events, _) = broadcast::channel(STATE_CHANNEL_CAPACITY);
        Self {
            config,
            state: RwLock::new(ConnectionState::Disconnected),
            transitions: Mutex::new(()),
            observer,
            events,
            link: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    /// Gateway URL.
    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Receive every subsequent state transition.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionState> {
        self.events.subscribe()
    }

    /// Open the WebSocket and start the transport task.
    ///
    /// Only valid from `disconnected` or `error`; anything else is a caller
    /// error reported as [`GatewayError::InvalidState`].
    pub async fn connect(
        self: &Arc<Self>,
        handler: Arc<dyn InboundHandler>,
    ) -> Result<(), GatewayError> {
        let generation = {
            let _guard = self.transitions.lock();
            let current = self.state();
            if !current.can_transition_to(ConnectionState::Connecting) {
                return Err(GatewayError::InvalidState { state: current });
            }
            self.apply(ConnectionState::Connecting);
            self.generation.fetch_add(1, Ordering::SeqCst) + 1
        };

        info!(url = %self.config.url, "connecting to gateway");
        let attempt =
            tokio::time::timeout(self.config.connect_timeout, connect_async(self.config.url.as_str()))
                .await;
        let ws = match attempt {
            Ok(Ok((ws, _response))) => ws,
            Ok(Err(e)) => return Err(self.fail_connect(generation, e.to_string())),
            Err(_) => {
                let reason = format!(
                    "timed out after {}ms",
                    self.config.connect_timeout.as_millis()
                );
                return Err(self.fail_connect(generation, reason));
            }
        };

        let _guard = self.transitions.lock();
        if self.generation.load(Ordering::SeqCst) != generation {
            // disconnect() ran while the handshake was in flight; dropping
            // the stream closes the socket.
            debug!("connect superseded by disconnect");
            return Err(GatewayError::ConnectFailed {
                url: self.config.url.clone(),
                reason: "cancelled by disconnect".into(),
            });
        }

        let (outbound, outbound_rx) = mpsc::channel(self.config.outbound_capacity.max(1));
        let cancel = CancellationToken::new();
        let manager = Arc::downgrade(self);
        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            let end = run_transport(ws, outbound_rx, task_cancel, handler.as_ref()).await;
            transport_finished(&manager, generation, end, handler.as_ref());
        });

        *self.link.lock() = Some(Link {
            outbound,
            cancel,
            _task: task,
        });
        self.apply(ConnectionState::Connected);
        info!(url = %self.config.url, "connected to gateway");
        Ok(())
    }

    /// Close the transport (if any) and enter `disconnected`.
    ///
    /// Valid from every state; a no-op when already disconnected. A connect
    /// still in its handshake fails with `ConnectFailed`.
    pub fn disconnect(&self) {
        let _guard = self.transitions.lock();
        let _ = self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(link) = self.link.lock().take() {
            link.cancel.cancel();
        }
        if self.state() != ConnectionState::Disconnected {
            info!(url = %self.config.url, "disconnecting from gateway");
            self.apply(ConnectionState::Disconnected);
        }
    }

    fn fail_connect(&self, generation: u64, reason: String) -> GatewayError {
        warn!(url = %self.config.url, %reason, "gateway connection failed");
        let _guard = self.transitions.lock();
        if self.generation.load(Ordering::SeqCst) == generation {
            self.apply(ConnectionState::Error);
        }
        GatewayError::ConnectFailed {
            url: self.config.url.clone(),
            reason,
        }
    }

    /// Called from the transport task once the socket is done.
    ///
    /// Returns whether this ended the current connection.
    fn transport_ended(&self, generation: u64, end: &TransportEnd) -> bool {
        let _guard = self.transitions.lock();
        if self.generation.load(Ordering::SeqCst) != generation
            || self.state() != ConnectionState::Connected
        {
            return false;
        }
        let _ = self.link.lock().take();
        match end {
            TransportEnd::Closed(reason) => {
                info!(%reason, "gateway connection closed");
                self.apply(ConnectionState::Disconnected);
            }
            TransportEnd::Failed(reason) => {
                warn!(%reason, "gateway connection failed");
                self.apply(ConnectionState::Error);
            }
            TransportEnd::Cancelled => {
                self.apply(ConnectionState::Disconnected);
            }
        }
        true
    }

    /// Set the state and notify. Caller holds `transitions`.
    fn apply(&self, next: ConnectionState) {
        let previous = {
            let mut state = self.state.write();
            std::mem::replace(&mut *state, next)
        };
        if !previous.can_transition_to(next) {
            warn!(%previous, %next, "unexpected state transition");
        }
        debug!(%previous, %next, "connection state changed");
        if let Some(observer) = &self.observer {
            observer(next);
        }
        let _ = self.events.send(next);
    }
}

impl FrameSink for ConnectionManager {
    fn is_open(&self) -> bool {
        self.state() == ConnectionState::Connected && self.link.lock().is_some()
    }

    fn send_frame(&self, frame: String) -> Result<(), GatewayError> {
        let link = self.link.lock();
        let Some(link) = link.as_ref() else {
            return Err(GatewayError::NotConnected);
        };
        link.outbound.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => GatewayError::Transport {
                reason: "outbound queue full".into(),
            },
            mpsc::error::TrySendError::Closed(_) => GatewayError::NotConnected,
        })
    }
}

fn transport_finished(
    manager: &Weak<ConnectionManager>,
    generation: u64,
    end: TransportEnd,
    handler: &dyn InboundHandler,
) {
    let Some(manager) = manager.upgrade() else {
        return;
    };
    if manager.transport_ended(generation, &end) {
        let reason = match end {
            TransportEnd::Closed(reason) | TransportEnd::Failed(reason) => reason,
            TransportEnd::Cancelled => "transport stopped".to_string(),
        };
        handler.on_transport_lost(&reason);
    }
}

/// Pump frames between the socket and the client until either side stops.
async fn run_transport(
    ws: WsStream,
    mut outbound: mpsc::Receiver<String>,
    cancel: CancellationToken,
    handler: &dyn InboundHandler,
) -> TransportEnd {
    let (mut ws_tx, mut ws_rx) = ws.split();

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                let _ = ws_tx.close().await;
                return TransportEnd::Cancelled;
            }
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    let _ = ws_tx.close().await;
                    return TransportEnd::Cancelled;
                };
                if let Err(e) = ws_tx.send(Message::Text(frame.into())).await {
                    return TransportEnd::Failed(e.to_string());
                }
            }
            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => handler.on_frame(text.as_str()),
                    Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                        Ok(text) => handler.on_frame(text),
                        Err(_) => warn!(len = bytes.len(), "discarding non-UTF-8 binary frame"),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| format!("{} {}", u16::from(f.code), f.reason.as_str()))
                            .unwrap_or_else(|| "closed by gateway".to_string());
                        return TransportEnd::Closed(reason);
                    }
                    // Ping/pong are answered by tungstenite.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return TransportEnd::Failed(e.to_string()),
                    None => return TransportEnd::Closed("stream ended".to_string()),
                }
            }
        }
    }
}
