//! Tracing setup shared by binaries and tests.

use std::io;

/// Install the stderr subscriber (respects `RUST_LOG`).
///
/// Returns `false` when a global subscriber was already installed.
pub fn init_tracing(level: tracing::Level) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .with_writer(io::stderr)
        .try_init()
        .is_ok()
}
