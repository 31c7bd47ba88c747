//! Registry storage backends

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::record::FileRecord;
use super::RegistryError;

/// Durable key-value store backing the registry, keyed by file ID
#[async_trait::async_trait]
pub trait RegistryStore: Send + Sync {
    /// Insert a record; fails with `DuplicateId` if the ID is taken
    async fn insert(&self, record: &FileRecord) -> Result<(), RegistryError>;

    async fn get(&self, id: &str) -> Result<Option<FileRecord>, RegistryError>;

    async fn find_by_stored_name(&self, stored_name: &str)
        -> Result<Option<FileRecord>, RegistryError>;

    /// Remove a record, returning whether it existed
    async fn remove(&self, id: &str) -> Result<bool, RegistryError>;

    /// Every record, expired or not, in no particular order
    async fn all(&self) -> Result<Vec<FileRecord>, RegistryError>;
}

/// In-memory registry store
#[derive(Clone, Default)]
pub struct MemoryRegistryStore {
    records: Arc<RwLock<HashMap<String, FileRecord>>>,
}

impl MemoryRegistryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl RegistryStore for MemoryRegistryStore {
    async fn insert(&self, record: &FileRecord) -> Result<(), RegistryError> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(RegistryError::DuplicateId(record.id.clone()));
        }
        if records.values().any(|r| r.stored_name == record.stored_name) {
            return Err(RegistryError::Backend(format!(
                "Stored name already registered: {}",
                record.stored_name
            )));
        }
        records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<FileRecord>, RegistryError> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn find_by_stored_name(
        &self,
        stored_name: &str,
    ) -> Result<Option<FileRecord>, RegistryError> {
        let records = self.records.read().await;
        Ok(records.values().find(|r| r.stored_name == stored_name).cloned())
    }

    async fn remove(&self, id: &str) -> Result<bool, RegistryError> {
        Ok(self.records.write().await.remove(id).is_some())
    }

    async fn all(&self) -> Result<Vec<FileRecord>, RegistryError> {
        Ok(self.records.read().await.values().cloned().collect())
    }
}
