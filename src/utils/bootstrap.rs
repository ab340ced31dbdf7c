//! Bootstrap utilities for patchbay binaries.
//!
//! Shared initialization code for the daemon and CLI.

use crate::config::LOG_ENV_VAR;

/// Initialize tracing with the PATCHBAY_LOG environment variable.
///
/// Defaults to "info" level if PATCHBAY_LOG is not set.
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
