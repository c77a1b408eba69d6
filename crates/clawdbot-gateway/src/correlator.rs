//! Request correlation: id allocation, pending-call table, and deadlines.
//!
//! The pending table is the only shared mutable state of the client. It is
//! written by issuing callers (insert) and by the router, the deadline, and
//! connection loss (removal), always under one mutex. Each entry is removed
//! exactly once; whoever removes it owns the outcome.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use clawdbot_core::{GatewayError, InboundEnvelope, OutboundEnvelope};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Fixed per-call deadline.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome delivered to a waiting caller.
type CallOutcome = Result<Value, GatewayError>;

/// Where encoded request frames go.
pub trait FrameSink: Send + Sync {
    /// Whether the transport currently accepts frames.
    fn is_open(&self) -> bool;

    /// Queue a text frame for transmission without blocking.
    fn send_frame(&self, frame: String) -> Result<(), GatewayError>;
}

/// An issued call awaiting its response.
struct PendingCall {
    method: String,
    created_at: Instant,
    tx: oneshot::Sender<CallOutcome>,
}

/// Allocates correlation ids and matches responses to outstanding calls.
pub struct RequestCorrelator {
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, PendingCall>>,
    timeout: Duration,
}

impl RequestCorrelator {
    /// Create a correlator with the given per-call deadline.
    pub fn new(timeout: Duration) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    /// Per-call deadline.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Issue a call and wait for its response, error, or deadline.
    ///
    /// Fails with [`GatewayError::NotConnected`] before allocating anything
    /// when the sink is closed. The entry is registered before the frame is
    /// handed over so a fast response can never miss it; if the hand-over
    /// fails the entry is withdrawn again.
    pub async fn issue(
        &self,
        sink: &dyn FrameSink,
        method: &str,
        params: Value,
        token: Option<&str>,
    ) -> CallOutcome {
        if !sink.is_open() {
            return Err(GatewayError::NotConnected);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = OutboundEnvelope::new(id, method, params, token).encode()?;

        let (tx, mut rx) = oneshot::channel();
        let _ = self.pending.lock().insert(
            id,
            PendingCall {
                method: method.to_string(),
                created_at: Instant::now(),
                tx,
            },
        );

        // Withdraws the entry on every exit path, including the caller
        // dropping this future before it settles.
        let _withdraw = Withdraw {
            pending: &self.pending,
            id,
        };

        if let Err(e) = sink.send_frame(frame) {
            debug!(id, method, error = %e, "send failed");
            return Err(e);
        }
        debug!(id, method, "call issued");

        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        tokio::select! {
            biased;
            outcome = &mut rx => outcome.unwrap_or_else(|_| Err(dropped())),
            () = &mut deadline => {
                let expired = self.pending.lock().remove(&id).is_some();
                if expired {
                    warn!(id, method, timeout_ms = self.timeout_ms(), "call timed out");
                    Err(GatewayError::Timeout {
                        id,
                        method: method.to_string(),
                        timeout_ms: self.timeout_ms(),
                    })
                } else {
                    // Claimed by the router (or connection loss) right at the deadline.
                    rx.await.unwrap_or_else(|_| Err(dropped()))
                }
            }
        }
    }

    /// Settle the pending call matching `envelope`, if any.
    ///
    /// Returns `false` when the id is absent or no longer registered (late
    /// response after a timeout, or a reply to someone else's id).
    pub fn resolve(&self, envelope: InboundEnvelope) -> bool {
        let Some(id) = envelope.id else {
            return false;
        };
        let Some(call) = self.pending.lock().remove(&id) else {
            return false;
        };

        #[allow(clippy::cast_possible_truncation)]
        let elapsed_ms = call.created_at.elapsed().as_millis() as u64;
        let outcome = envelope.into_outcome().map_err(|message| {
            let err = GatewayError::rpc(message.as_deref());
            debug!(id, method = %call.method, elapsed_ms, error = %err, "call rejected by gateway");
            err
        });
        if outcome.is_ok() {
            debug!(id, method = %call.method, elapsed_ms, "call resolved");
        }
        // The caller may have gone away; nothing to do then.
        let _ = call.tx.send(outcome);
        true
    }

    /// Reject every pending call with [`GatewayError::ConnectionClosed`].
    ///
    /// Returns how many calls were rejected.
    pub fn reject_all(&self, reason: &str) -> usize {
        let drained: Vec<(u64, PendingCall)> = self.pending.lock().drain().collect();
        let count = drained.len();
        for (id, call) in drained {
            debug!(id, method = %call.method, reason, "rejecting pending call");
            let _ = call.tx.send(Err(GatewayError::ConnectionClosed {
                reason: reason.to_string(),
            }));
        }
        if count > 0 {
            warn!(count, reason, "rejected pending calls");
        }
        count
    }

    /// Whether `id` is currently awaiting a response.
    pub fn is_pending(&self, id: u64) -> bool {
        self.pending.lock().contains_key(&id)
    }

    /// Number of outstanding calls.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    #[allow(clippy::cast_possible_truncation)]
    fn timeout_ms(&self) -> u64 {
        self.timeout.as_millis() as u64
    }
}

impl Default for RequestCorrelator {
    fn default() -> Self {
        Self::new(DEFAULT_REQUEST_TIMEOUT)
    }
}

/// Removes a call's entry when its `issue` future ends or is dropped.
///
/// Ids are never reused, so removing an already settled id is a no-op.
struct Withdraw<'a> {
    pending: &'a Mutex<HashMap<u64, PendingCall>>,
    id: u64,
}

impl Drop for Withdraw<'_> {
    fn drop(&mut self) {
        if self.pending.lock().remove(&self.id).is_some() {
            debug!(id = self.id, "call withdrawn before settling");
        }
    }
}

fn dropped() -> GatewayError {
    GatewayError::ConnectionClosed {
        reason: "call abandoned".into(),
    }
}
