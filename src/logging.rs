// src/logging.rs

//! Tracing subscriber bootstrap for hosts and tests.

use tracing_subscriber::EnvFilter;

/// Installs a global `tracing` subscriber honoring `RUST_LOG`, falling back
/// to the provided default directive (e.g. `"info"` or `"refract=debug"`).
///
/// Safe to call more than once; subsequent calls are no-ops.
pub fn init(default_directive: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
