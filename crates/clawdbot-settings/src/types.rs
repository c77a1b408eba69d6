//! Settings type definitions.
//!
//! Field names are camelCase in JSON. Every struct is `#[serde(default)]`,
//! so a settings file only needs the keys it changes.

use serde::{Deserialize, Serialize};

/// Gateway endpoint the dashboard talks to out of the box.
pub const DEFAULT_GATEWAY_URL: &str = "ws://127.0.0.1:18789";

/// Root settings for the Gateway client.
///
/// ```json
/// {
///   "url": "ws://gateway.local:18789",
///   "token": "…",
///   "reconnect": { "maxRetries": 10 }
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewaySettings {
    /// Gateway WebSocket URL.
    pub url: String,
    /// Auth token merged into every request's params.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Deadline for each RPC call in milliseconds.
    pub request_timeout_ms: u64,
    /// Deadline for establishing the WebSocket in milliseconds.
    pub connect_timeout_ms: u64,
    /// Frames buffered towards the socket before sends are refused.
    pub outbound_queue_capacity: usize,
    /// Default tracing filter.
    pub log_level: String,
    /// Reconnect behaviour.
    pub reconnect: ReconnectSettings,
    /// Session polling interval for `watch`, in seconds.
    pub poll_interval_secs: u64,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_GATEWAY_URL.to_string(),
            token: None,
            request_timeout_ms: 30_000,
            connect_timeout_ms: 10_000,
            outbound_queue_capacity: 256,
            log_level: "warn".to_string(),
            reconnect: ReconnectSettings::default(),
            poll_interval_secs: 30,
        }
    }
}

/// Automatic reconnect with exponential backoff.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconnectSettings {
    /// Whether long-running consumers reconnect after the connection drops.
    pub enabled: bool,
    /// Retries after the first failed attempt.
    pub max_retries: u32,
    /// Base delay in milliseconds.
    pub base_delay_ms: u64,
    /// Delay cap in milliseconds.
    pub max_delay_ms: u64,
    /// Jitter factor in `0.0..=1.0`.
    pub jitter_factor: f64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 5,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            jitter_factor: 0.2,
        }
    }
}
