//! Single-file JSON record store.
//!
//! The whole registry is one JSON document keyed by record key. Every save
//! rewrites the document through a temp file and rename, so a crash leaves
//! either the old or the new registry, never a torn one.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::{PersistedRecord, RecordStore, Result};

pub struct FileStore {
    path: PathBuf,
    records: RwLock<BTreeMap<String, PersistedRecord>>,
}

impl FileStore {
    /// Open the store, reading the existing document if there is one.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let records = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), records = records.len(), "opened registry file");
        Ok(Self {
            path,
            records: RwLock::new(records),
        })
    }

    /// Serialize the given map and swap it into place.
    async fn flush(&self, records: &BTreeMap<String, PersistedRecord>) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(records)?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for FileStore {
    async fn save(&self, record: &PersistedRecord) -> Result<()> {
        let mut records = self.records.write().await;
        records.insert(record.key(), record.clone());
        self.flush(&records).await
    }

    async fn load_all(&self) -> Result<Vec<PersistedRecord>> {
        Ok(self.records.read().await.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{sample_signal, sample_slot};
    use super::*;

    #[tokio::test]
    async fn test_open_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("registry.json"))
            .await
            .unwrap();
        assert!(store.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");

        let store = FileStore::open(&path).await.unwrap();
        store
            .save(&PersistedRecord::Signal(sample_signal("temperature")))
            .await
            .unwrap();
        store
            .save(&PersistedRecord::Slot(sample_slot("display")))
            .await
            .unwrap();
        drop(store);

        let reopened = FileStore::open(&path).await.unwrap();
        let records = reopened.load_all().await.unwrap();
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn test_document_is_one_json_map() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");

        let store = FileStore::open(&path).await.unwrap();
        store
            .save(&PersistedRecord::Signal(sample_signal("temperature")))
            .await
            .unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert!(doc.get("signal:temperature").is_some());

        // No temp file left behind
        assert!(!path.with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn test_corrupt_document_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        std::fs::write(&path, b"{ not json").unwrap();

        assert!(FileStore::open(&path).await.is_err());
    }
}
