//! # clawdbot-gateway
//!
//! Multiplexed JSON-RPC client for the Clawdbot Gateway WebSocket.
//!
//! - [`connection`]: lifecycle state machine and the socket task
//! - [`correlator`]: pending-call table, ids and per-call deadlines
//! - [`router`]: inbound frame dispatch and the passive observer
//! - [`client`]: [`ClawdbotClient`], tying the three together
//! - [`api`]: typed Gateway operations
//! - [`reconnect`]: connect with exponential backoff
//!
//! ```no_run
//! # async fn demo() -> clawdbot_core::Result<()> {
//! use clawdbot_gateway::{ClawdbotClient, ClientOptions, ListSessionsParams};
//!
//! let client = ClawdbotClient::new(ClientOptions::default());
//! client.connect().await?;
//! let sessions = client
//!     .list_sessions(ListSessionsParams { limit: Some(10), ..Default::default() })
//!     .await?;
//! println!("{} sessions", sessions.len());
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]

pub mod api;
pub mod client;
pub mod connection;
pub mod correlator;
pub mod reconnect;
pub mod router;

pub use api::{HistoryOptions, ListSessionsParams, methods};
pub use client::{ClawdbotClient, ClientOptions};
pub use connection::{ConnectionConfig, ConnectionManager, InboundHandler, StateObserver};
pub use correlator::{DEFAULT_REQUEST_TIMEOUT, FrameSink, RequestCorrelator};
pub use reconnect::{ReconnectPolicy, backoff_delay, connect_with_retry};
pub use router::{MessageObserver, MessageRouter, RouteOutcome};
