//! Tracing setup for embedders and binaries.

use tracing_subscriber::EnvFilter;

/// Installs a global `tracing` subscriber with `RUST_LOG` filtering.
///
/// Defaults to `info` when `RUST_LOG` is unset. Audit events (protocol
/// violations, data-integrity failures) are emitted under the `audit`
/// target, so operators can route them separately:
/// `RUST_LOG=info,audit=warn`.
///
/// Safe to call once per process; subsequent calls are ignored.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
