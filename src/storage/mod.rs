//! Registry persistence.
//!
//! The registry keeps its authoritative state in memory; stores here only
//! have to absorb record upserts and hand everything back on startup.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::client::{Signal, Slot};

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

/// Errors from persistence backends.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage io: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage backend: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Storage type discriminator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    #[default]
    File,
    Memory,
}

impl std::fmt::Display for StorageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageType::File => write!(f, "file"),
            StorageType::Memory => write!(f, "memory"),
        }
    }
}

/// Registry persistence configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage type discriminator.
    #[serde(rename = "type")]
    pub storage_type: StorageType,
    /// Registry file path (file storage only).
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_type: StorageType::File,
            path: "/tmp/patchbay/registry.json".to_string(),
        }
    }
}

/// One durable registry record.
///
/// Signals and slots share a name namespace per kind, so the persisted key
/// carries the kind prefix.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "lowercase")]
pub enum PersistedRecord {
    Signal(Signal),
    Slot(Slot),
}

impl PersistedRecord {
    /// Stable key this record is stored under.
    pub fn key(&self) -> String {
        match self {
            PersistedRecord::Signal(signal) => format!("signal:{}", signal.name),
            PersistedRecord::Slot(slot) => format!("slot:{}", slot.name),
        }
    }
}

/// Durable store for registry records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert or replace one record.
    async fn save(&self, record: &PersistedRecord) -> Result<()>;

    /// All records, in no particular order.
    async fn load_all(&self) -> Result<Vec<PersistedRecord>>;
}

/// Initialize storage based on configuration.
pub async fn init_storage(
    config: &StorageConfig,
) -> std::result::Result<Arc<dyn RecordStore>, Box<dyn std::error::Error>> {
    info!("Storage: {} at {}", config.storage_type, config.path);

    match config.storage_type {
        StorageType::File => {
            if let Some(parent) = std::path::Path::new(&config.path).parent() {
                std::fs::create_dir_all(parent)?;
            }
            let store = FileStore::open(&config.path).await?;
            Ok(Arc::new(store))
        }
        StorageType::Memory => Ok(Arc::new(MemoryStore::default())),
    }
}
