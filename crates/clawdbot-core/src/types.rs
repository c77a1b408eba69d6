//! Connection state and the result records returned by typed Gateway calls.
//!
//! The records are transient deserialization targets: they carry no identity
//! or lifecycle inside the client. Field names are camelCase on the wire and
//! everything the Gateway may omit is optional or defaulted.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a Gateway connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No transport; `connect()` may be called.
    #[default]
    Disconnected,
    /// A connect attempt is in flight.
    Connecting,
    /// Transport open; calls may be issued.
    Connected,
    /// The last connect attempt or the open transport failed.
    Error,
}

impl ConnectionState {
    /// Wire/display name of the state.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        }
    }

    /// Whether moving from `self` to `next` is an edge of the lifecycle graph.
    ///
    /// `connected` is only reachable through `connecting`. Any state may
    /// return to `disconnected` through an explicit disconnect.
    pub fn can_transition_to(self, next: Self) -> bool {
        use ConnectionState::{Connected, Connecting, Disconnected, Error};
        matches!(
            (self, next),
            (Disconnected | Error, Connecting)
                | (Connecting, Connected | Error | Disconnected)
                | (Connected | Error, Disconnected)
                | (Connected, Error)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A Gateway session (`sessions.list`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Session key, used by `sessions.history` / `sessions.send`.
    pub key: String,
    /// Session kind (e.g. `chat`).
    #[serde(default)]
    pub kind: String,
    /// Owning agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// Model serving the session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Delivery channel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// Creation timestamp as reported by the Gateway.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// Last activity timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<String>,
    /// Most recent messages, when `messageLimit` was requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<Message>>,
}

/// Author of a session message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// Human input.
    User,
    /// Model output.
    Assistant,
    /// System prompt or notice.
    System,
    /// Tool call or result (only with `includeTools`).
    Tool,
    /// Any role this client does not know about.
    #[serde(other)]
    Other,
}

/// A message in a session transcript (`sessions.history`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Message author.
    pub role: MessageRole,
    /// Message text.
    #[serde(default)]
    pub content: String,
    /// When the message was recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

/// A scheduled job known to the Gateway (`cron.list`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronJob {
    /// Job identifier, used by `cron.run`.
    pub id: String,
    /// Cron expression.
    #[serde(default)]
    pub schedule: String,
    /// Prompt delivered when the job fires.
    #[serde(default)]
    pub text: String,
    /// Whether the schedule is active.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Last execution time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<String>,
    /// Next scheduled execution time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run: Option<String>,
}

fn default_enabled() -> bool {
    true
}

/// Gateway health summary (`status`).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewayStatus {
    /// Gateway version string.
    pub version: String,
    /// Seconds since the Gateway started.
    pub uptime: f64,
    /// Number of live sessions.
    pub sessions: u64,
    /// Default model.
    pub model: String,
}
