//! # clawdbot-core
//!
//! Foundation types shared by the Clawdbot Gateway client crates:
//!
//! - [`wire`]: JSON-RPC envelopes exchanged with the Gateway and their codec
//! - [`types`]: connection state plus the result records returned by typed calls
//! - [`errors`]: the [`GatewayError`] taxonomy every call resolves with
//! - [`logging`]: `tracing` subscriber setup for binaries

#![deny(unsafe_code)]

pub mod errors;
pub mod logging;
pub mod types;
pub mod wire;

pub use errors::{GatewayError, Result};
pub use types::{ConnectionState, CronJob, GatewayStatus, Message, MessageRole, Session};
pub use wire::{DecodeError, InboundEnvelope, OutboundEnvelope, PROTOCOL_VERSION};
