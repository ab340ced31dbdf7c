//! Data-plane transport.
//!
//! Values flow producer-to-consumer over Unix domain sockets, never
//! through the registry. Both sides derive the socket path from the same
//! naming convention, so no address-resolution call exists anywhere.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::info;

mod endpoint;
mod frame;
mod signal;
mod slot;

pub use endpoint::SignalAddress;
pub use frame::{encode_value, read_value, TransportError};
pub use signal::SignalPublisher;
pub use slot::SlotReceiver;

/// Data-plane transport configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Base path for signal socket files.
    pub base_path: PathBuf,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("/tmp/patchbay"),
        }
    }
}

/// RAII guard for cleaning up UDS socket files.
pub struct UdsCleanupGuard {
    path: PathBuf,
}

impl UdsCleanupGuard {
    /// Create a new cleanup guard for the given socket path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the socket path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for UdsCleanupGuard {
    fn drop(&mut self) {
        if self.path.exists() {
            if let Err(e) = std::fs::remove_file(&self.path) {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to clean up UDS socket"
                );
            } else {
                tracing::debug!(
                    path = %self.path.display(),
                    "Cleaned up UDS socket"
                );
            }
        }
    }
}

/// Prepare a UDS socket path for binding.
///
/// - Creates parent directories if needed
/// - Removes stale socket file if exists
/// - Returns a cleanup guard that removes the socket on drop
pub fn prepare_uds_socket(path: &Path) -> std::io::Result<UdsCleanupGuard> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if path.exists() {
        info!(path = %path.display(), "Removing stale UDS socket");
        std::fs::remove_file(path)?;
    }

    Ok(UdsCleanupGuard::new(path))
}
