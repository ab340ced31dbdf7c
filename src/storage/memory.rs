//! In-memory record store for tests and ephemeral registries.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{PersistedRecord, RecordStore, Result};

/// Volatile store, lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, PersistedRecord>>,
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn save(&self, record: &PersistedRecord) -> Result<()> {
        self.records
            .write()
            .await
            .insert(record.key(), record.clone());
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<PersistedRecord>> {
        Ok(self.records.read().await.values().cloned().collect())
    }
}
