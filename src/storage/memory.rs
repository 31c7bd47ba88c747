//! In-memory blob store for tests and local development

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::error::StorageError;

use super::blob_store::{public_url, BlobStore};
use super::types::{ContainerId, ContainerStatus};

/// A stored asset
#[derive(Debug, Clone)]
pub struct MemoryAsset {
    pub data: Vec<u8>,
    pub content_type: String,
}

/// In-memory blob store
///
/// Carries switches to simulate backend failures and the first-use creation
/// race between processes.
pub struct MemoryBlobStore {
    public_base_url: String,
    containers: Mutex<HashMap<String, HashMap<String, MemoryAsset>>>,
    fail_lookups: AtomicBool,
    fail_uploads: AtomicBool,
    lose_create_race: AtomicBool,
    create_attempts: AtomicUsize,
}

impl MemoryBlobStore {
    pub fn new(public_base_url: impl Into<String>) -> Self {
        Self {
            public_base_url: public_base_url.into(),
            containers: Mutex::new(HashMap::new()),
            fail_lookups: AtomicBool::new(false),
            fail_uploads: AtomicBool::new(false),
            lose_create_race: AtomicBool::new(false),
            create_attempts: AtomicUsize::new(0),
        }
    }

    /// Make container lookups fail with a non-"not found" error
    pub fn set_fail_lookups(&self, fail: bool) {
        self.fail_lookups.store(fail, Ordering::SeqCst);
    }

    /// Make asset uploads fail
    pub fn set_fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    /// Have the next creation attempt find that another process created the
    /// container after our lookup
    pub fn lose_next_create_race(&self) {
        self.lose_create_race.store(true, Ordering::SeqCst);
    }

    /// Number of container creation attempts made so far
    pub fn create_attempts(&self) -> usize {
        self.create_attempts.load(Ordering::SeqCst)
    }

    pub fn container_exists(&self, tag: &str) -> bool {
        self.containers.lock().contains_key(tag)
    }

    pub fn asset_count(&self) -> usize {
        self.containers.lock().values().map(HashMap::len).sum()
    }

    /// Fetch an asset by its public URL
    pub fn fetch(&self, url: &str) -> Option<MemoryAsset> {
        let containers = self.containers.lock();
        containers.iter().find_map(|(tag, assets)| {
            let container = ContainerId::new(tag.clone());
            assets
                .iter()
                .find(|(name, _)| public_url(&self.public_base_url, &container, name) == url)
                .map(|(_, asset)| asset.clone())
        })
    }
}

#[async_trait::async_trait]
impl BlobStore for MemoryBlobStore {
    async fn ensure_container(&self, tag: &str) -> Result<ContainerStatus, StorageError> {
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(StorageError::LookupFailed {
                container: tag.to_string(),
                message: "simulated lookup failure".to_string(),
            });
        }

        let id = ContainerId::new(tag);
        let mut containers = self.containers.lock();

        if containers.contains_key(tag) {
            return Ok(ContainerStatus::AlreadyExists(id));
        }

        self.create_attempts.fetch_add(1, Ordering::SeqCst);

        if self.lose_create_race.swap(false, Ordering::SeqCst) {
            // The other process's create landed first; ours is rejected and a
            // second lookup finds the container.
            containers.insert(tag.to_string(), HashMap::new());
            tracing::debug!(container = %tag, "Container created concurrently, reusing");
            return Ok(ContainerStatus::AlreadyExists(id));
        }

        containers.insert(tag.to_string(), HashMap::new());
        tracing::info!(container = %tag, "Created blob container");
        Ok(ContainerStatus::Created(id))
    }

    async fn upload_asset(
        &self,
        container: &ContainerId,
        name: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StorageError> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(StorageError::UploadFailed {
                name: name.to_string(),
                message: "simulated upload failure".to_string(),
            });
        }

        let mut containers = self.containers.lock();
        let assets = containers
            .get_mut(container.as_str())
            .ok_or_else(|| StorageError::ContainerNotFound(container.to_string()))?;

        assets.insert(
            name.to_string(),
            MemoryAsset {
                data,
                content_type: content_type.to_string(),
            },
        );

        Ok(public_url(&self.public_base_url, container, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ensure_container_creates_once() {
        let store = MemoryBlobStore::new("memory://cdn");

        let first = store.ensure_container("gallery").await.unwrap();
        assert!(matches!(first, ContainerStatus::Created(_)));

        let second = store.ensure_container("gallery").await.unwrap();
        assert!(matches!(second, ContainerStatus::AlreadyExists(_)));
        assert_eq!(store.create_attempts(), 1);
    }

    #[tokio::test]
    async fn test_lookup_failure_propagates_without_create() {
        let store = MemoryBlobStore::new("memory://cdn");
        store.set_fail_lookups(true);

        let result = store.ensure_container("gallery").await;
        assert!(matches!(result, Err(StorageError::LookupFailed { .. })));
        assert_eq!(store.create_attempts(), 0);
        assert!(!store.container_exists("gallery"));
    }

    #[tokio::test]
    async fn test_lost_create_race_is_success() {
        let store = MemoryBlobStore::new("memory://cdn");
        store.lose_next_create_race();

        let status = store.ensure_container("gallery").await.unwrap();
        assert_eq!(status, ContainerStatus::AlreadyExists(ContainerId::new("gallery")));
        assert!(store.container_exists("gallery"));
    }

    #[tokio::test]
    async fn test_upload_and_fetch() {
        let store = MemoryBlobStore::new("memory://cdn");
        let container = store.ensure_container("gallery").await.unwrap().into_container_id();

        let url = store
            .upload_asset(&container, "a.txt", b"hello".to_vec(), "text/plain")
            .await
            .unwrap();

        assert_eq!(url, "memory://cdn/gallery/a.txt");
        let asset = store.fetch(&url).unwrap();
        assert_eq!(asset.data, b"hello");
        assert_eq!(asset.content_type, "text/plain");
    }

    #[tokio::test]
    async fn test_upload_failure_surfaces() {
        let store = MemoryBlobStore::new("memory://cdn");
        let container = store.ensure_container("gallery").await.unwrap().into_container_id();
        store.set_fail_uploads(true);

        let result = store
            .upload_asset(&container, "a.txt", b"hello".to_vec(), "text/plain")
            .await;
        assert!(matches!(result, Err(StorageError::UploadFailed { .. })));
        assert_eq!(store.asset_count(), 0);
    }
}
