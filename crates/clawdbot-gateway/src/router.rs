//! Inbound frame dispatch.
//!
//! Every frame is decoded once. Frames whose id matches a pending call settle
//! that call; every decoded frame, matched or not, is then offered to the
//! passive observer. Undecodable frames are logged and dropped.

use std::sync::Arc;

use clawdbot_core::InboundEnvelope;
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::connection::InboundHandler;
use crate::correlator::RequestCorrelator;

/// Passive observer of every decoded inbound frame.
pub type MessageObserver = Arc<dyn Fn(&Value) + Send + Sync>;

/// What the router did with a frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Settled the pending call with this id.
    Resolved(u64),
    /// Carried an id nobody is waiting for (late or foreign reply).
    Unmatched(u64),
    /// Server push without a correlation id.
    Unsolicited,
    /// Could not be decoded; dropped.
    Malformed,
}

/// Routes inbound frames to the correlator and the passive observer.
pub struct MessageRouter {
    correlator: Arc<RequestCorrelator>,
    observer: Option<MessageObserver>,
}

impl MessageRouter {
    /// Create a router feeding `correlator`.
    pub fn new(correlator: Arc<RequestCorrelator>, observer: Option<MessageObserver>) -> Self {
        Self {
            correlator,
            observer,
        }
    }

    /// Dispatch one raw text frame.
    pub fn route(&self, frame: &str) -> RouteOutcome {
        let envelope = match InboundEnvelope::decode(frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, len = frame.len(), "discarding malformed frame");
                return RouteOutcome::Malformed;
            }
        };

        // The observer sees the frame even when it settles a call.
        let raw = self.observer.as_ref().map(|_| envelope.raw.clone());

        let outcome = match envelope.id {
            Some(id) => {
                if self.correlator.resolve(envelope) {
                    RouteOutcome::Resolved(id)
                } else {
                    debug!(id, "no pending call for response");
                    RouteOutcome::Unmatched(id)
                }
            }
            None => {
                trace!(method = envelope.method().unwrap_or("-"), "unsolicited frame");
                RouteOutcome::Unsolicited
            }
        };

        if let (Some(observer), Some(raw)) = (&self.observer, raw) {
            observer(&raw);
        }
        outcome
    }
}

impl InboundHandler for MessageRouter {
    fn on_frame(&self, frame: &str) {
        let _ = self.route(frame);
    }

    fn on_transport_lost(&self, reason: &str) {
        let _ = self.correlator.reject_all(reason);
    }
}
