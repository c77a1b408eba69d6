//! Gateway client error types.

use thiserror::Error;

use crate::types::ConnectionState;

/// Message used when the server reports an error without one.
pub const DEFAULT_RPC_ERROR_MESSAGE: &str = "RPC error";

/// Errors surfaced by the Gateway client.
///
/// Every failure is returned to the caller that issued the affected call or
/// connect attempt; none of them is fatal to the client instance.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// A call was attempted while the connection is not open.
    #[error("Not connected")]
    NotConnected,

    /// `connect()` was called while already connecting or connected.
    #[error("cannot connect while {state}")]
    InvalidState {
        /// State the client was in when `connect()` was called.
        state: ConnectionState,
    },

    /// The transport could not be established.
    #[error("failed to connect to {url}: {reason}")]
    ConnectFailed {
        /// Endpoint we tried to reach.
        url: String,
        /// Why it failed.
        reason: String,
    },

    /// The Gateway answered the call with an error payload.
    #[error("{message}")]
    Rpc {
        /// Server-supplied message.
        message: String,
    },

    /// No matching response arrived before the deadline.
    #[error("Request timeout: {method} (id {id}) after {timeout_ms}ms")]
    Timeout {
        /// Correlation id of the call.
        id: u64,
        /// RPC method name.
        method: String,
        /// Deadline that elapsed.
        timeout_ms: u64,
    },

    /// The connection went away while the call was pending.
    #[error("connection closed: {reason}")]
    ConnectionClosed {
        /// Why the connection ended.
        reason: String,
    },

    /// The outbound frame could not be handed to the transport.
    #[error("transport error: {reason}")]
    Transport {
        /// What went wrong.
        reason: String,
    },

    /// Parameters could not be serialized.
    #[error("failed to encode request: {0}")]
    Codec(#[from] serde_json::Error),

    /// The result did not match the shape expected by a typed call.
    #[error("unexpected result for {method}: {source}")]
    InvalidResult {
        /// RPC method name.
        method: String,
        /// Deserialization failure.
        source: serde_json::Error,
    },
}

impl GatewayError {
    /// Build a server-reported error, falling back to a generic message.
    pub fn rpc(message: Option<&str>) -> Self {
        Self::Rpc {
            message: message.unwrap_or(DEFAULT_RPC_ERROR_MESSAGE).to_string(),
        }
    }

    /// Whether the call failed because its deadline elapsed.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Whether the Gateway itself reported the failure.
    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::Rpc { .. })
    }

    /// Whether retrying after a reconnect may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NotConnected
                | Self::ConnectFailed { .. }
                | Self::ConnectionClosed { .. }
                | Self::Timeout { .. }
                | Self::Transport { .. }
        )
    }
}

/// Result type for Gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;
