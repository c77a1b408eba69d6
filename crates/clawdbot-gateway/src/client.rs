//! The Gateway client: one connection, many concurrent calls.

use std::sync::Arc;
use std::time::Duration;

use clawdbot_core::{ConnectionState, GatewayError, Result};
use clawdbot_settings::GatewaySettings;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

use crate::connection::{
    ConnectionConfig, ConnectionManager, DEFAULT_CONNECT_TIMEOUT, DEFAULT_OUTBOUND_CAPACITY,
    InboundHandler, StateObserver,
};
use crate::correlator::{DEFAULT_REQUEST_TIMEOUT, RequestCorrelator};
use crate::router::{MessageObserver, MessageRouter};

/// Construction options for [`ClawdbotClient`].
#[derive(Clone)]
pub struct ClientOptions {
    /// Gateway WebSocket URL.
    pub url: String,
    /// Auth token merged into every request's params.
    pub token: Option<String>,
    /// Per-call deadline.
    pub request_timeout: Duration,
    /// Handshake deadline.
    pub connect_timeout: Duration,
    /// Frames buffered towards the socket.
    pub outbound_capacity: usize,
    /// Fired on every state transition.
    pub on_state_change: Option<StateObserver>,
    /// Fired for every decoded inbound frame.
    pub on_message: Option<MessageObserver>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            url: clawdbot_settings::types::DEFAULT_GATEWAY_URL.to_string(),
            token: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            on_state_change: None,
            on_message: None,
        }
    }
}

impl std::fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientOptions")
            .field("url", &self.url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("request_timeout", &self.request_timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("outbound_capacity", &self.outbound_capacity)
            .field("on_state_change", &self.on_state_change.is_some())
            .field("on_message", &self.on_message.is_some())
            .finish()
    }
}

impl ClientOptions {
    /// Options for `url` with everything else defaulted.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Options taken from loaded settings.
    pub fn from_settings(settings: &GatewaySettings) -> Self {
        Self {
            url: settings.url.clone(),
            token: settings.token.clone(),
            request_timeout: Duration::from_millis(settings.request_timeout_ms),
            connect_timeout: Duration::from_millis(settings.connect_timeout_ms),
            outbound_capacity: settings.outbound_queue_capacity,
            on_state_change: None,
            on_message: None,
        }
    }

    /// Set the auth token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Set the per-call deadline.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the handshake deadline.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Observe state transitions.
    #[must_use]
    pub fn on_state_change(mut self, observer: impl Fn(ConnectionState) + Send + Sync + 'static) -> Self {
        self.on_state_change = Some(Arc::new(observer));
        self
    }

    /// Observe every decoded inbound frame.
    #[must_use]
    pub fn on_message(mut self, observer: impl Fn(&Value) + Send + Sync + 'static) -> Self {
        self.on_message = Some(Arc::new(observer));
        self
    }
}

/// Client for one Clawdbot Gateway.
///
/// Calls may be issued concurrently from any number of tasks; responses are
/// matched back by id regardless of arrival order.
pub struct ClawdbotClient {
    connection: Arc<ConnectionManager>,
    correlator: Arc<RequestCorrelator>,
    router: Arc<MessageRouter>,
    token: Option<String>,
}

impl ClawdbotClient {
    /// Create a disconnected client.
    pub fn new(options: ClientOptions) -> Self {
        let correlator = Arc::new(RequestCorrelator::new(options.request_timeout));
        let router = Arc::new(MessageRouter::new(correlator.clone(), options.on_message));
        let connection = Arc::new(ConnectionManager::new(
            ConnectionConfig {
                url: options.url,
                connect_timeout: options.connect_timeout,
                outbound_capacity: options.outbound_capacity,
            },
            options.on_state_change,
        ));
        Self {
            connection,
            correlator,
            router,
            token: options.token,
        }
    }

    /// Gateway URL.
    pub fn url(&self) -> &str {
        self.connection.url()
    }

    /// Open the connection. See [`ConnectionManager::connect`].
    pub async fn connect(&self) -> Result<()> {
        let handler: Arc<dyn InboundHandler> = self.router.clone();
        self.connection.connect(handler).await
    }

    /// Close the connection and fail every outstanding call.
    pub fn disconnect(&self) {
        self.connection.disconnect();
        let rejected = self.correlator.reject_all("client disconnected");
        if rejected > 0 {
            debug!(rejected, "rejected pending calls on disconnect");
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Whether calls can be issued right now.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Receive every subsequent state transition.
    pub fn subscribe_state(&self) -> broadcast::Receiver<ConnectionState> {
        self.connection.subscribe()
    }

    /// Calls awaiting a response.
    pub fn pending_calls(&self) -> usize {
        self.correlator.pending_count()
    }

    /// Issue a raw RPC call and return its `result`.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        self.correlator
            .issue(
                self.connection.as_ref(),
                method,
                params,
                self.token.as_deref(),
            )
            .await
    }

    /// Issue a call and decode its `result` into `T`.
    pub async fn call_as<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let value = self.call(method, params).await?;
        serde_json::from_value(value).map_err(|source| GatewayError::InvalidResult {
            method: method.to_string(),
            source,
        })
    }
}

impl Drop for ClawdbotClient {
    fn drop(&mut self) {
        self.connection.disconnect();
        let _ = self.correlator.reject_all("client dropped");
    }
}
