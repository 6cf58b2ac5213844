//! Structured logging setup (`spec.md` §2 item 11), grounded on the
//! teacher's `logger` crate: an `EnvFilter`-driven `tracing-subscriber`
//! layer on stdout. `RUST_LOG`, when set, overrides the configured level.

use tracing_subscriber::EnvFilter;

/// Initialize the global `tracing` subscriber at `default_level` (one of
/// error/warn/info/debug/trace).
pub fn init(default_level: &str) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize logger: {e}"))
}
