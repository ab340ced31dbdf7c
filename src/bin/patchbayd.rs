//! patchbayd: signal/slot registry daemon
//!
//! Owns the authoritative signal and slot tables, serves the control
//! plane and writes every accepted mutation through to the record store.
//! Values never pass through this process; producers and consumers
//! exchange them over their own channels once wired.
//!
//! ## Configuration
//!
//! Reads `patchbay.yaml` from the working directory, or the file named by
//! PATCHBAY_CONFIG. Every key can be overridden from the environment,
//! e.g. `PATCHBAY__SERVER__TRANSPORT=tcp`.

use std::sync::Arc;

use tracing::{error, info};

use patchbay::config::Config;
use patchbay::registry::RegistryStore;
use patchbay::rpc::RegistryServer;
use patchbay::storage::init_storage;
use patchbay::utils::bootstrap::init_tracing;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    info!("Starting patchbayd");

    let config = Config::load(None).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    let records = init_storage(&config.storage).await.map_err(|e| {
        error!("Failed to initialize storage: {}", e);
        e
    })?;
    let store = Arc::new(RegistryStore::open(records).await?);
    let server = RegistryServer::new(store);

    tokio::select! {
        result = server.serve(&config.server) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }

    Ok(())
}
