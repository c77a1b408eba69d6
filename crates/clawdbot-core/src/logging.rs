//! Structured logging setup.
//!
//! Library code only emits `tracing` events; binaries call
//! [`init_subscriber`] once at startup.

use tracing_subscriber::EnvFilter;

/// Default filter when neither `RUST_LOG` nor a configured level is set.
pub const DEFAULT_LEVEL: &str = "warn";

/// Initialize the global tracing subscriber with stderr output.
///
/// `RUST_LOG` takes precedence over `level`. Subsequent calls are no-ops.
pub fn init_subscriber(level: &str) {
    let level = if level.trim().is_empty() {
        DEFAULT_LEVEL
    } else {
        level
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact();

    // try_init fails if a global subscriber is already set
    let _ = subscriber.try_init();
}
