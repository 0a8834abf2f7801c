//! Shared utilities: logging setup and retry backoff.

mod backoff;

pub use backoff::ExponentialBackoff;

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber.
///
/// Respects `RUST_LOG`; defaults to `info` when unset. Safe to call once
/// per process; subsequent calls are ignored.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
