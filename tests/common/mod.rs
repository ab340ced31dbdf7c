//! Shared harness for integration tests: an in-process registry served
//! on a Unix domain socket inside a scratch directory. The same directory
//! doubles as the data-plane base path, so signal channels land next to
//! the registry socket the way they do under /tmp/patchbay.

use std::sync::Arc;

use tempfile::TempDir;
use tokio::task::JoinHandle;

use patchbay::client::{Identity, RegistryClient};
use patchbay::registry::RegistryStore;
use patchbay::rpc::RegistryServer;
use patchbay::storage::{init_storage, StorageConfig, StorageType};

pub struct TestRegistry {
    pub dir: TempDir,
    pub server: JoinHandle<()>,
    pub endpoint: String,
}

impl TestRegistry {
    /// Stop the server and hand back the state directory, so a second
    /// registry can start over the same records.
    pub async fn shutdown(self) -> TempDir {
        self.server.abort();
        let _ = self.server.await;
        self.dir
    }
}

pub async fn start_registry() -> TestRegistry {
    start_registry_in(tempfile::tempdir().unwrap()).await
}

pub async fn start_registry_in(dir: TempDir) -> TestRegistry {
    let config = StorageConfig {
        storage_type: StorageType::File,
        path: dir
            .path()
            .join("registry.json")
            .to_string_lossy()
            .into_owned(),
    };
    let records = init_storage(&config).await.unwrap();
    let store = Arc::new(RegistryStore::open(records).await.unwrap());

    let socket = dir.path().join("registry.sock");
    let endpoint = socket.to_string_lossy().into_owned();
    let server = tokio::spawn(async move {
        let server = RegistryServer::new(store);
        if let Err(e) = server.serve_uds(&socket).await {
            panic!("registry server failed: {e}");
        }
    });

    TestRegistry {
        dir,
        server,
        endpoint,
    }
}

pub async fn client_as(registry: &TestRegistry, executable: &str) -> RegistryClient {
    RegistryClient::connect_with_retry(&registry.endpoint)
        .await
        .unwrap()
        .with_identity(Identity::new(executable, "def"))
}
