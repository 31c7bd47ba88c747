//! Chunk Store
//!
//! Transient storage for uploaded chunks before assembly. Chunks are keyed by
//! (upload ID, chunk index) and written independently, so arrival order does
//! not matter and re-sending an index overwrites the earlier copy.
//! Supports local filesystem and in-memory backends.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::types::UploadError;

// ============================================================================
// Chunk Storage Trait
// ============================================================================

/// Trait for chunk storage backends
#[async_trait::async_trait]
pub trait ChunkStorage: Send + Sync {
    /// Store a chunk, replacing any previous copy of the same index
    async fn put_chunk(
        &self,
        upload_id: Uuid,
        chunk_index: usize,
        data: &[u8],
    ) -> Result<(), UploadError>;

    /// Get a chunk, `None` if it was never stored
    async fn get_chunk(
        &self,
        upload_id: Uuid,
        chunk_index: usize,
    ) -> Result<Option<Vec<u8>>, UploadError>;

    /// Delete a single chunk, returning whether it existed
    async fn delete_chunk(&self, upload_id: Uuid, chunk_index: usize) -> Result<bool, UploadError>;

    /// Delete all chunks for an upload, returning how many were removed
    async fn delete_session_chunks(&self, upload_id: Uuid) -> Result<usize, UploadError>;
}

// ============================================================================
// Chunk Store (Main Implementation)
// ============================================================================

/// Chunk store with a pluggable backend
#[derive(Clone)]
pub struct ChunkStore {
    backend: Arc<dyn ChunkStorage>,
}

impl ChunkStore {
    pub fn new(backend: Arc<dyn ChunkStorage>) -> Self {
        Self { backend }
    }

    /// Create with local filesystem storage
    pub fn with_local_storage(base_path: PathBuf) -> Self {
        Self::new(Arc::new(LocalChunkStorage::new(base_path)))
    }

    /// Create with in-memory storage
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryChunkStorage::default()))
    }

    /// Store a chunk, verifying it against a SHA-256 hex digest when given
    pub async fn store_chunk(
        &self,
        upload_id: Uuid,
        chunk_index: usize,
        data: &[u8],
        expected_hash: Option<&str>,
    ) -> Result<(), UploadError> {
        if let Some(expected) = expected_hash {
            let actual = compute_hash(data);
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(UploadError::Validation(format!(
                    "Chunk {} hash mismatch: expected {}, got {}",
                    chunk_index, expected, actual
                )));
            }
        }

        self.backend.put_chunk(upload_id, chunk_index, data).await?;

        tracing::debug!(
            upload_id = %upload_id,
            chunk_index = chunk_index,
            size = data.len(),
            "Chunk stored"
        );

        Ok(())
    }

    /// Concatenate chunks `0..chunk_count` in index order
    ///
    /// Any chunk missing from storage fails the whole assembly; a partial
    /// buffer is never returned.
    pub async fn assemble_chunks(
        &self,
        upload_id: Uuid,
        chunk_count: usize,
        size_hint: usize,
    ) -> Result<Vec<u8>, UploadError> {
        let mut result = Vec::with_capacity(size_hint);

        for index in 0..chunk_count {
            let chunk = self
                .backend
                .get_chunk(upload_id, index)
                .await?
                .ok_or_else(|| UploadError::IncompleteUpload {
                    missing: vec![index],
                })?;
            result.extend_from_slice(&chunk);
        }

        Ok(result)
    }

    /// Delete one chunk of an upload
    pub async fn delete_chunk(
        &self,
        upload_id: Uuid,
        chunk_index: usize,
    ) -> Result<bool, UploadError> {
        self.backend.delete_chunk(upload_id, chunk_index).await
    }

    /// Delete all chunks for an upload
    pub async fn delete_session_chunks(&self, upload_id: Uuid) -> Result<usize, UploadError> {
        self.backend.delete_session_chunks(upload_id).await
    }
}

// ============================================================================
// Local Filesystem Storage
// ============================================================================

/// Local filesystem chunk storage
pub struct LocalChunkStorage {
    base_path: PathBuf,
}

impl LocalChunkStorage {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn session_dir(&self, upload_id: Uuid) -> PathBuf {
        self.base_path.join(upload_id.to_string())
    }

    fn chunk_path(&self, upload_id: Uuid, chunk_index: usize) -> PathBuf {
        self.session_dir(upload_id)
            .join(format!("{:08}.chunk", chunk_index))
    }
}

#[async_trait::async_trait]
impl ChunkStorage for LocalChunkStorage {
    async fn put_chunk(
        &self,
        upload_id: Uuid,
        chunk_index: usize,
        data: &[u8],
    ) -> Result<(), UploadError> {
        let path = self.chunk_path(upload_id, chunk_index);
        tokio::fs::create_dir_all(self.session_dir(upload_id))
            .await
            .map_err(|e| UploadError::ChunkStorage(e.to_string()))?;

        // Write aside then rename so a re-sent chunk replaces the old one whole
        let partial = path.with_extension(format!("part-{}", Uuid::new_v4().simple()));
        tokio::fs::write(&partial, data)
            .await
            .map_err(|e| UploadError::ChunkStorage(e.to_string()))?;

        if let Err(e) = tokio::fs::rename(&partial, &path).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(UploadError::ChunkStorage(e.to_string()));
        }

        Ok(())
    }

    async fn get_chunk(
        &self,
        upload_id: Uuid,
        chunk_index: usize,
    ) -> Result<Option<Vec<u8>>, UploadError> {
        let path = self.chunk_path(upload_id, chunk_index);
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(UploadError::ChunkStorage(format!(
                "Failed to read chunk: {}",
                e
            ))),
        }
    }

    async fn delete_chunk(&self, upload_id: Uuid, chunk_index: usize) -> Result<bool, UploadError> {
        match tokio::fs::remove_file(self.chunk_path(upload_id, chunk_index)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(UploadError::ChunkStorage(e.to_string())),
        }

        // Fails while other chunks remain, which is fine
        let _ = tokio::fs::remove_dir(self.session_dir(upload_id)).await;
        Ok(true)
    }

    async fn delete_session_chunks(&self, upload_id: Uuid) -> Result<usize, UploadError> {
        let session_dir = self.session_dir(upload_id);

        let mut entries = match tokio::fs::read_dir(&session_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(UploadError::ChunkStorage(e.to_string())),
        };

        let mut count = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| UploadError::ChunkStorage(e.to_string()))?
        {
            tokio::fs::remove_file(entry.path())
                .await
                .map_err(|e| UploadError::ChunkStorage(e.to_string()))?;
            count += 1;
        }

        tokio::fs::remove_dir(&session_dir)
            .await
            .map_err(|e| UploadError::ChunkStorage(e.to_string()))?;

        Ok(count)
    }
}

// ============================================================================
// In-Memory Storage
// ============================================================================

/// In-memory chunk storage
#[derive(Default)]
pub struct MemoryChunkStorage {
    chunks: RwLock<HashMap<Uuid, HashMap<usize, Vec<u8>>>>,
}

#[async_trait::async_trait]
impl ChunkStorage for MemoryChunkStorage {
    async fn put_chunk(
        &self,
        upload_id: Uuid,
        chunk_index: usize,
        data: &[u8],
    ) -> Result<(), UploadError> {
        let mut chunks = self.chunks.write().await;
        chunks
            .entry(upload_id)
            .or_default()
            .insert(chunk_index, data.to_vec());
        Ok(())
    }

    async fn get_chunk(
        &self,
        upload_id: Uuid,
        chunk_index: usize,
    ) -> Result<Option<Vec<u8>>, UploadError> {
        let chunks = self.chunks.read().await;
        Ok(chunks
            .get(&upload_id)
            .and_then(|session| session.get(&chunk_index))
            .cloned())
    }

    async fn delete_chunk(&self, upload_id: Uuid, chunk_index: usize) -> Result<bool, UploadError> {
        let mut chunks = self.chunks.write().await;
        let Some(session) = chunks.get_mut(&upload_id) else {
            return Ok(false);
        };
        let removed = session.remove(&chunk_index).is_some();
        if session.is_empty() {
            chunks.remove(&upload_id);
        }
        Ok(removed)
    }

    async fn delete_session_chunks(&self, upload_id: Uuid) -> Result<usize, UploadError> {
        let mut chunks = self.chunks.write().await;
        Ok(chunks.remove(&upload_id).map(|s| s.len()).unwrap_or(0))
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Compute SHA-256 hash of data as lowercase hex
pub fn compute_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

// ============================================================================
// Tests
// ============================================================================
