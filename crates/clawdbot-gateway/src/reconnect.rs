//! Reconnect with exponential backoff.

use std::time::Duration;

use clawdbot_core::{GatewayError, Result};
use clawdbot_settings::ReconnectSettings;
use tracing::{info, warn};

use crate::client::ClawdbotClient;

/// Backoff parameters for [`connect_with_retry`].
#[derive(Clone, Debug, PartialEq)]
pub struct ReconnectPolicy {
    /// Retries after the first failed attempt.
    pub max_retries: u32,
    /// Delay before the first retry, before jitter.
    pub base_delay: Duration,
    /// Upper bound on the un-jittered delay.
    pub max_delay: Duration,
    /// Jitter factor in `0.0..=1.0`.
    pub jitter_factor: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_settings(&ReconnectSettings::default())
    }
}

impl ReconnectPolicy {
    /// Policy from the `reconnect` settings block.
    pub fn from_settings(settings: &ReconnectSettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            jitter_factor: settings.jitter_factor.clamp(0.0, 1.0),
        }
    }

    /// Delay before retry number `attempt` (zero-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        backoff_delay(attempt, self.base_delay, self.max_delay, self.jitter_factor, rand::random())
    }
}

/// `min(max, base * 2^attempt) * (1 + random * jitter)`.
///
/// `random` is expected in `[0.0, 1.0)`.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn backoff_delay(
    attempt: u32,
    base: Duration,
    max: Duration,
    jitter_factor: f64,
    random: f64,
) -> Duration {
    let base_ms = base.as_millis() as u64;
    let max_ms = max.as_millis() as u64;
    let capped = base_ms.saturating_mul(1u64 << attempt.min(31)).min(max_ms);
    let scaled = (capped as f64) * (1.0 + random.clamp(0.0, 1.0) * jitter_factor);
    Duration::from_millis(scaled.round().max(0.0) as u64)
}

/// Connect, retrying connection failures with backoff.
///
/// Returns the number of retries it took. Caller errors such as connecting
/// an already connected client are returned at once.
pub async fn connect_with_retry(client: &ClawdbotClient, policy: &ReconnectPolicy) -> Result<u32> {
    let mut attempt = 0;
    loop {
        match client.connect().await {
            Ok(()) => {
                if attempt > 0 {
                    info!(retries = attempt, "reconnected to gateway");
                }
                return Ok(attempt);
            }
            Err(e @ GatewayError::ConnectFailed { .. }) if attempt < policy.max_retries => {
                let delay = policy.delay_for(attempt);
                warn!(
                    error = %e,
                    attempt = attempt + 1,
                    max_retries = policy.max_retries,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "connect failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
