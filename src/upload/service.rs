//! Upload Service
//!
//! Ties the ingestion pipeline together:
//! session registry -> chunk store -> assembly -> compression -> blob store
//! -> file registry.
//!
//! A registry record is only written once the blob upload has succeeded.
//! Chunk data and the session entry are removed after every `complete`,
//! whether it succeeded or not.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::OnceCell;
use uuid::Uuid;

use crate::compression::{self, CompressionOutcome};
use crate::config::UploadConfig;
use crate::registry::{FileRecord, FileRegistry};
use crate::storage::{generate_asset_name, BlobStore, ContainerId, ContainerStatus};

use super::chunk_store::ChunkStore;
use super::session::SessionStore;
use super::types::{
    chunk_count, parse_upload_id, ChunkUploadResponse, CompleteRequest, InitRequest,
    InitResponse, SessionStatusResponse, UploadError, UploadSession,
};

/// Fallback MIME type for single-shot uploads without one
const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Chunked and single-shot ingestion
#[derive(Clone)]
pub struct UploadService {
    inner: Arc<UploadServiceInner>,
}

struct UploadServiceInner {
    sessions: Arc<dyn SessionStore>,
    chunks: ChunkStore,
    blob_store: Arc<dyn BlobStore>,
    container_tag: String,
    /// Resolved once per process
    container: OnceCell<ContainerId>,
    registry: FileRegistry,
    config: UploadConfig,
}

impl UploadService {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        chunks: ChunkStore,
        blob_store: Arc<dyn BlobStore>,
        registry: FileRegistry,
        container_tag: impl Into<String>,
        config: UploadConfig,
    ) -> Self {
        Self {
            inner: Arc::new(UploadServiceInner {
                sessions,
                chunks,
                blob_store,
                container_tag: container_tag.into(),
                container: OnceCell::new(),
                registry,
                config,
            }),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.inner.config.chunk_size
    }

    pub fn registry(&self) -> &FileRegistry {
        &self.inner.registry
    }

    // ========================================================================
    // Chunked protocol
    // ========================================================================

    /// Open an upload session
    pub async fn init(&self, request: InitRequest) -> Result<InitResponse, UploadError> {
        let config = &self.inner.config;
        validate_init(&request, config)?;

        if let Some(ttl) = config.session_ttl_secs {
            match idle_cutoff(Utc::now(), ttl) {
                Some(cutoff) => {
                    self.sweep_idle_sessions(cutoff).await;
                }
                None => tracing::warn!(ttl_secs = ttl, "Session TTL out of range, skipping sweep"),
            }
        }

        let session = UploadSession::new(&request, config.chunk_size, Utc::now());
        let response = InitResponse {
            upload_id: session.id.to_string(),
            total_chunks: session.total_chunks,
            chunk_size: session.chunk_size,
        };

        tracing::info!(
            upload_id = %session.id,
            file_name = %session.file_name,
            file_size = session.original_size,
            total_chunks = session.total_chunks,
            "Upload session opened"
        );

        self.inner.sessions.insert(session).await?;
        Ok(response)
    }

    /// Store one chunk of an open session
    pub async fn receive_chunk(
        &self,
        upload_id: &str,
        chunk_index: usize,
        data: &[u8],
        expected_hash: Option<&str>,
    ) -> Result<ChunkUploadResponse, UploadError> {
        let id = parse_upload_id(upload_id)?;
        let session = self.inner.sessions.get(id).await?;

        if chunk_index >= session.total_chunks {
            return Err(UploadError::Validation(format!(
                "Chunk index {} out of range (total chunks: {})",
                chunk_index, session.total_chunks
            )));
        }
        if data.is_empty() {
            return Err(UploadError::Validation(format!(
                "Chunk {} is empty",
                chunk_index
            )));
        }
        if data.len() > session.chunk_size {
            return Err(UploadError::Validation(format!(
                "Chunk {} is {} bytes, larger than the chunk size of {}",
                chunk_index,
                data.len(),
                session.chunk_size
            )));
        }

        self.inner
            .chunks
            .store_chunk(id, chunk_index, data, expected_hash)
            .await?;

        let updated = match self.inner.sessions.mark_chunk_received(id, chunk_index).await {
            Ok(updated) => updated,
            Err(e) => {
                // Completed or cancelled while the chunk was being written
                tracing::warn!(
                    upload_id = %id,
                    chunk_index = chunk_index,
                    error = %e,
                    "Chunk stored for a session that is gone, discarding it"
                );
                if let Err(cleanup) = self.inner.chunks.delete_chunk(id, chunk_index).await {
                    tracing::warn!(
                        upload_id = %id,
                        chunk_index = chunk_index,
                        error = %cleanup,
                        "Failed to discard orphaned chunk"
                    );
                }
                return Err(e);
            }
        };

        tracing::debug!(
            upload_id = %id,
            chunk_index = chunk_index,
            uploaded_chunks = updated.received_chunks.len(),
            total_chunks = updated.total_chunks,
            progress = format!("{:.1}%", updated.progress() * 100.0),
            "Chunk received"
        );

        Ok(ChunkUploadResponse {
            chunk_index,
            uploaded_chunks: updated.received_chunks.len(),
            total_chunks: updated.total_chunks,
        })
    }

    pub async fn status(&self, upload_id: &str) -> Result<SessionStatusResponse, UploadError> {
        let id = parse_upload_id(upload_id)?;
        Ok(self.inner.sessions.get(id).await?.status())
    }

    /// Drop a session and its chunk data
    pub async fn cancel(&self, upload_id: &str) -> Result<(), UploadError> {
        let id = parse_upload_id(upload_id)?;
        self.inner.sessions.remove(id).await?;
        self.discard_chunks(id).await;

        tracing::info!(upload_id = %id, "Upload session cancelled");
        Ok(())
    }

    /// Assemble a finished session and store the file
    ///
    /// The session is taken out of the registry before anything else, so a
    /// concurrent second `complete` for the same ID sees `SessionNotFound`.
    pub async fn complete(
        &self,
        upload_id: &str,
        request: CompleteRequest,
    ) -> Result<FileRecord, UploadError> {
        let id = parse_upload_id(upload_id)?;
        let session = self.inner.sessions.remove(id).await?;

        let result = self.finish(&session, request).await;

        // Cleanup never turns the outcome into a different one
        self.discard_chunks(id).await;

        match &result {
            Ok(record) => tracing::info!(
                upload_id = %id,
                file_id = %record.id,
                stored_name = %record.stored_name,
                size = record.size,
                compressed = record.compressed,
                "Upload completed"
            ),
            Err(e) => tracing::warn!(upload_id = %id, error = %e, "Upload failed to complete"),
        }

        result
    }

    async fn finish(
        &self,
        session: &UploadSession,
        request: CompleteRequest,
    ) -> Result<FileRecord, UploadError> {
        if !session.is_complete() {
            return Err(UploadError::IncompleteUpload {
                missing: session.missing_chunks(),
            });
        }

        let data = self
            .inner
            .chunks
            .assemble_chunks(
                session.id,
                session.total_chunks,
                session.original_size as usize,
            )
            .await?;

        if let Some(expected) = request.total_size {
            if data.len() as u64 != expected {
                return Err(UploadError::Validation(format!(
                    "Assembled size {} does not match totalSize {}",
                    data.len(),
                    expected
                )));
            }
        }
        if data.len() as u64 != session.original_size {
            return Err(UploadError::Validation(format!(
                "Assembled size {} does not match declared file size {}",
                data.len(),
                session.original_size
            )));
        }

        let original_name = request
            .original_name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| session.file_name.clone());
        let mime_type = request
            .mime_type
            .filter(|mime| !mime.trim().is_empty())
            .unwrap_or_else(|| session.mime_type.clone());

        self.store_file(&original_name, &mime_type, data).await
    }

    // ========================================================================
    // Single-shot upload
    // ========================================================================

    /// Store a file that fits in one request
    pub async fn upload_single(
        &self,
        original_name: &str,
        mime_type: Option<&str>,
        data: Vec<u8>,
    ) -> Result<FileRecord, UploadError> {
        if original_name.trim().is_empty() {
            return Err(UploadError::Validation("File name is required".to_string()));
        }
        if data.is_empty() {
            return Err(UploadError::Validation("File is empty".to_string()));
        }
        if data.len() > self.chunk_size() {
            return Err(UploadError::Validation(format!(
                "File is {} bytes; files over {} bytes must use the chunked protocol",
                data.len(),
                self.chunk_size()
            )));
        }

        let mime_type = mime_type
            .filter(|mime| !mime.trim().is_empty())
            .map(str::to_string)
            .or_else(|| {
                mime_guess::from_path(original_name)
                    .first()
                    .map(|mime| mime.to_string())
            })
            .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string());

        let record = self.store_file(original_name, &mime_type, data).await?;
        tracing::info!(
            file_id = %record.id,
            stored_name = %record.stored_name,
            size = record.size,
            "Single-shot upload stored"
        );
        Ok(record)
    }

    // ========================================================================
    // Storage pipeline
    // ========================================================================

    /// Compress, upload and register an assembled buffer
    pub async fn store_file(
        &self,
        original_name: &str,
        mime_type: &str,
        data: Vec<u8>,
    ) -> Result<FileRecord, UploadError> {
        let (data, outcome) = self.compress(data, mime_type).await;
        let compressed = outcome.compressed();
        let compression_ratio = outcome.compression_ratio;
        let data = outcome.into_buffer(data);

        let container = self.container().await?;
        let stored_name = generate_asset_name(original_name, mime_type);
        let size = data.len() as u64;

        let blob_url = self
            .inner
            .blob_store
            .upload_asset(container, &stored_name, data, mime_type)
            .await?;

        let upload_date = Utc::now();
        let record = FileRecord {
            id: Uuid::new_v4().to_string(),
            original_name: original_name.to_string(),
            stored_name,
            size,
            mime_type: mime_type.to_string(),
            upload_date,
            expiry_date: upload_date + self.inner.registry.retention(),
            blob_url,
            compressed,
            compression_ratio,
        };

        match self.inner.registry.create(record).await {
            Ok(record) => Ok(record),
            Err(e) => {
                tracing::error!(
                    original_name = %original_name,
                    error = %e,
                    "Registry write failed after blob upload, blob is orphaned"
                );
                Err(e.into())
            }
        }
    }

    /// Run the compression policy on the blocking pool
    ///
    /// Returns the original buffer alongside the outcome; a dead worker is
    /// treated as a failed compression.
    async fn compress(&self, data: Vec<u8>, mime_type: &str) -> (Vec<u8>, CompressionOutcome) {
        let data = Arc::new(data);
        let worker_data = Arc::clone(&data);
        let worker_mime = mime_type.to_string();

        let outcome = match tokio::task::spawn_blocking(move || {
            compression::compress(&worker_data, &worker_mime)
        })
        .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(mime_type = %mime_type, error = %e, "Compression worker failed");
                CompressionOutcome::failed()
            }
        };

        let data = Arc::try_unwrap(data).unwrap_or_else(|shared| shared.as_ref().clone());
        (data, outcome)
    }

    async fn container(&self) -> Result<&ContainerId, UploadError> {
        let inner = &self.inner;
        let container = inner
            .container
            .get_or_try_init(|| async {
                let status = inner.blob_store.ensure_container(&inner.container_tag).await?;
                match &status {
                    ContainerStatus::Created(id) => {
                        tracing::info!(container = %id, "Blob container created")
                    }
                    ContainerStatus::AlreadyExists(id) => {
                        tracing::debug!(container = %id, "Using existing blob container")
                    }
                }
                Ok::<_, UploadError>(status.into_container_id())
            })
            .await?;
        Ok(container)
    }

    // ========================================================================
    // Session cleanup
    // ========================================================================

    /// Remove sessions idle since before `cutoff`, with their chunk data
    pub async fn sweep_idle_sessions(&self, cutoff: DateTime<Utc>) -> usize {
        let idle = self.inner.sessions.idle_since(cutoff).await;

        let mut swept = 0;
        for id in idle {
            // Another caller may have completed or swept it meanwhile
            if self.inner.sessions.remove(id).await.is_ok() {
                self.discard_chunks(id).await;
                swept += 1;
            }
        }

        if swept > 0 {
            tracing::info!(count = swept, "Swept idle upload sessions");
        }
        swept
    }

    async fn discard_chunks(&self, id: Uuid) {
        match self.inner.chunks.delete_session_chunks(id).await {
            Ok(count) => {
                tracing::debug!(upload_id = %id, chunks = count, "Chunk data removed")
            }
            Err(e) => {
                tracing::warn!(upload_id = %id, error = %e, "Failed to remove chunk data")
            }
        }
    }
}

fn validate_init(request: &InitRequest, config: &UploadConfig) -> Result<(), UploadError> {
    if request.file_name.trim().is_empty() {
        return Err(UploadError::Validation("fileName is required".to_string()));
    }
    if request.mime_type.trim().is_empty() {
        return Err(UploadError::Validation("mimeType is required".to_string()));
    }
    if request.file_size == 0 {
        return Err(UploadError::Validation("fileSize must be positive".to_string()));
    }
    if request.file_size > config.max_file_size {
        return Err(UploadError::Validation(format!(
            "fileSize {} exceeds the maximum of {}",
            request.file_size, config.max_file_size
        )));
    }

    let expected = chunk_count(request.file_size, config.chunk_size);
    if let Some(total_chunks) = request.total_chunks {
        if total_chunks != expected {
            return Err(UploadError::Validation(format!(
                "totalChunks {} does not match {} chunks of {} bytes",
                total_chunks, expected, config.chunk_size
            )));
        }
    }

    Ok(())
}

/// Last-activity time before which a session counts as idle, `None` when
/// the TTL does not fit a chrono duration
fn idle_cutoff(now: DateTime<Utc>, ttl_secs: u64) -> Option<DateTime<Utc>> {
    i64::try_from(ttl_secs)
        .ok()
        .and_then(Duration::try_seconds)
        .and_then(|ttl| now.checked_sub_signed(ttl))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::tests::large_jpeg;
    use crate::registry::MemoryRegistryStore;
    use crate::storage::MemoryBlobStore;
    use crate::upload::session::MemorySessionStore;

    struct Harness {
        service: UploadService,
        blobs: Arc<MemoryBlobStore>,
        sessions: MemorySessionStore,
        chunks: ChunkStore,
    }

    fn harness_with(config: UploadConfig) -> Harness {
        let blobs = Arc::new(MemoryBlobStore::new("memory://cdn"));
        let sessions = MemorySessionStore::new();
        let chunks = ChunkStore::in_memory();
        let registry = FileRegistry::new(Arc::new(MemoryRegistryStore::new()), 14);
        let service = UploadService::new(
            Arc::new(sessions.clone()),
            chunks.clone(),
            blobs.clone(),
            registry,
            "gallery",
            config,
        );
        Harness {
            service,
            blobs,
            sessions,
            chunks,
        }
    }

    fn harness() -> Harness {
        harness_with(UploadConfig::default())
    }

    fn small_chunks(chunk_size: usize) -> Harness {
        harness_with(UploadConfig {
            chunk_size,
            ..UploadConfig::default()
        })
    }

    fn init_request(name: &str, size: u64, mime: &str) -> InitRequest {
        InitRequest {
            file_name: name.to_string(),
            file_size: size,
            mime_type: mime.to_string(),
            total_chunks: None,
        }
    }

    /// Deterministic non-repeating payload
    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    async fn upload_in_order(
        service: &UploadService,
        name: &str,
        mime: &str,
        data: &[u8],
        order: &[usize],
    ) -> Result<FileRecord, UploadError> {
        let init = service
            .init(init_request(name, data.len() as u64, mime))
            .await?;
        let chunks: Vec<&[u8]> = data.chunks(init.chunk_size).collect();
        for &index in order {
            service
                .receive_chunk(&init.upload_id, index, chunks[index], None)
                .await?;
        }
        service
            .complete(&init.upload_id, CompleteRequest::default())
            .await
    }

    fn permutations(n: usize) -> Vec<Vec<usize>> {
        if n == 0 {
            return vec![vec![]];
        }
        let mut all = Vec::new();
        for rest in permutations(n - 1) {
            for pos in 0..=rest.len() {
                let mut p = rest.clone();
                p.insert(pos, n - 1);
                all.push(p);
            }
        }
        all
    }

    #[tokio::test]
    async fn test_every_send_order_reassembles_identically() {
        let h = small_chunks(4);
        let data = payload(14); // 4 chunks, short last chunk

        for order in permutations(4) {
            let record = upload_in_order(
                &h.service,
                "notes.bin",
                "application/octet-stream",
                &data,
                &order,
            )
            .await
            .unwrap();
            let stored = h.blobs.fetch(&record.blob_url).unwrap();
            assert_eq!(stored.data, data, "order {:?}", order);
        }
        assert_eq!(h.service.registry().list().await.len(), 24);
    }

    #[tokio::test]
    async fn test_ten_megabyte_upload_out_of_order() {
        let h = harness();
        let data = payload(10 * 1024 * 1024);

        let init = h
            .service
            .init(init_request("clip.mp4", data.len() as u64, "video/mp4"))
            .await
            .unwrap();
        assert_eq!(init.chunk_size, 3_670_016);
        assert_eq!(init.total_chunks, 3);

        let chunks: Vec<&[u8]> = data.chunks(init.chunk_size).collect();
        for index in [2, 0, 1] {
            h.service
                .receive_chunk(&init.upload_id, index, chunks[index], None)
                .await
                .unwrap();
        }

        let record = h
            .service
            .complete(
                &init.upload_id,
                CompleteRequest {
                    total_size: Some(data.len() as u64),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(record.size, 10 * 1024 * 1024);
        assert_eq!(record.original_name, "clip.mp4");
        assert!(!record.compressed);
        assert_eq!(h.blobs.fetch(&record.blob_url).unwrap().data, data);
    }

    #[tokio::test]
    async fn test_missing_chunk_fails_without_record() {
        let h = small_chunks(4);
        let data = payload(12);

        let init = h
            .service
            .init(init_request("a.bin", 12, "application/octet-stream"))
            .await
            .unwrap();
        h.service.receive_chunk(&init.upload_id, 0, &data[0..4], None).await.unwrap();
        h.service.receive_chunk(&init.upload_id, 2, &data[8..12], None).await.unwrap();

        let result = h
            .service
            .complete(&init.upload_id, CompleteRequest::default())
            .await;
        match result {
            Err(UploadError::IncompleteUpload { missing }) => assert_eq!(missing, vec![1]),
            other => panic!("expected IncompleteUpload, got {:?}", other),
        }

        assert!(h.service.registry().list().await.is_empty());
        assert_eq!(h.blobs.asset_count(), 0);

        // Session and chunk data are gone either way
        assert!(matches!(
            h.service.status(&init.upload_id).await,
            Err(UploadError::SessionNotFound(_))
        ));
        let id = parse_upload_id(&init.upload_id).unwrap();
        assert!(h.chunks.assemble_chunks(id, 1, 0).await.is_err());
    }

    #[tokio::test]
    async fn test_second_complete_sees_session_not_found() {
        let h = small_chunks(4);
        let data = payload(4);

        let init = h
            .service
            .init(init_request("a.bin", 4, "application/octet-stream"))
            .await
            .unwrap();
        h.service.receive_chunk(&init.upload_id, 0, &data, None).await.unwrap();

        h.service
            .complete(&init.upload_id, CompleteRequest::default())
            .await
            .unwrap();
        assert!(matches!(
            h.service.complete(&init.upload_id, CompleteRequest::default()).await,
            Err(UploadError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_total_size_mismatch() {
        let h = small_chunks(4);
        let data = payload(6);

        let init = h
            .service
            .init(init_request("a.bin", 6, "application/octet-stream"))
            .await
            .unwrap();
        h.service.receive_chunk(&init.upload_id, 0, &data[..4], None).await.unwrap();
        h.service.receive_chunk(&init.upload_id, 1, &data[4..], None).await.unwrap();

        let result = h
            .service
            .complete(
                &init.upload_id,
                CompleteRequest {
                    total_size: Some(7),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(result, Err(UploadError::Validation(_))));
        assert!(h.service.registry().list().await.is_empty());
    }

    #[tokio::test]
    async fn test_resent_chunk_overwrites() {
        let h = small_chunks(4);

        let init = h
            .service
            .init(init_request("a.bin", 4, "application/octet-stream"))
            .await
            .unwrap();
        let first = h.service.receive_chunk(&init.upload_id, 0, b"aaaa", None).await.unwrap();
        let second = h.service.receive_chunk(&init.upload_id, 0, b"bbbb", None).await.unwrap();
        assert_eq!(first.uploaded_chunks, 1);
        assert_eq!(second.uploaded_chunks, 1);

        let record = h
            .service
            .complete(&init.upload_id, CompleteRequest::default())
            .await
            .unwrap();
        assert_eq!(h.blobs.fetch(&record.blob_url).unwrap().data, b"bbbb");
    }

    #[tokio::test]
    async fn test_chunk_validation() {
        let h = small_chunks(4);
        let init = h
            .service
            .init(init_request("a.bin", 8, "application/octet-stream"))
            .await
            .unwrap();

        let out_of_range = h.service.receive_chunk(&init.upload_id, 2, b"abcd", None).await;
        assert!(matches!(out_of_range, Err(UploadError::Validation(_))));

        let oversize = h.service.receive_chunk(&init.upload_id, 0, b"abcde", None).await;
        assert!(matches!(oversize, Err(UploadError::Validation(_))));

        let empty = h.service.receive_chunk(&init.upload_id, 0, b"", None).await;
        assert!(matches!(empty, Err(UploadError::Validation(_))));

        let bad_hash = h
            .service
            .receive_chunk(&init.upload_id, 0, b"abcd", Some("00"))
            .await;
        assert!(matches!(bad_hash, Err(UploadError::Validation(_))));

        let status = h.service.status(&init.upload_id).await.unwrap();
        assert_eq!(status.uploaded_chunks, 0);
        assert_eq!(status.missing_chunks, vec![0, 1]);

        let unknown = h.service.receive_chunk(&Uuid::new_v4().to_string(), 0, b"abcd", None).await;
        assert!(matches!(unknown, Err(UploadError::SessionNotFound(_))));
        let malformed = h.service.receive_chunk("nope", 0, b"abcd", None).await;
        assert!(matches!(malformed, Err(UploadError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn test_init_validation() {
        let h = harness();

        for request in [
            init_request("", 10, "image/png"),
            init_request("a.png", 10, ""),
            init_request("a.png", 0, "image/png"),
            init_request("a.png", UploadConfig::default().max_file_size + 1, "image/png"),
            InitRequest {
                total_chunks: Some(2),
                ..init_request("a.png", 10, "image/png")
            },
        ] {
            assert!(matches!(
                h.service.init(request).await,
                Err(UploadError::Validation(_))
            ));
        }

        let ok = InitRequest {
            total_chunks: Some(1),
            ..init_request("a.png", 10, "image/png")
        };
        assert_eq!(h.service.init(ok).await.unwrap().total_chunks, 1);
    }

    #[tokio::test]
    async fn test_large_jpeg_is_compressed() {
        let h = harness();
        let original = large_jpeg();

        let order: Vec<usize> = (0..original.len().div_ceil(h.service.chunk_size())).collect();
        let record = upload_in_order(&h.service, "photo.jpg", "image/jpeg", &original, &order)
            .await
            .unwrap();

        assert!(record.compressed);
        assert!(record.compression_ratio.unwrap() > 0.0);
        assert!(record.size < original.len() as u64);
        assert!(record.stored_name.ends_with(".jpg"));

        let stored = h.blobs.fetch(&record.blob_url).unwrap();
        assert_eq!(stored.data.len() as u64, record.size);
        assert_eq!(stored.content_type, "image/jpeg");
    }

    #[tokio::test]
    async fn test_concurrent_first_uploads_share_container() {
        let h = harness();
        assert!(!h.blobs.container_exists("gallery"));

        let (a, b) = tokio::join!(
            h.service.upload_single("a.txt", Some("text/plain"), b"first".to_vec()),
            h.service.upload_single("a.txt", Some("text/plain"), b"second".to_vec()),
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_ne!(a.id, b.id);
        assert_ne!(a.stored_name, b.stored_name);
        assert_ne!(a.blob_url, b.blob_url);
        assert_eq!(h.blobs.create_attempts(), 1);
        assert_eq!(h.blobs.fetch(&a.blob_url).unwrap().data, b"first");
        assert_eq!(h.blobs.fetch(&b.blob_url).unwrap().data, b"second");
    }

    #[tokio::test]
    async fn test_identical_concurrent_uploads_are_not_deduplicated() {
        let h = small_chunks(4);
        let data = payload(10);

        let uploads = (0..4).map(|_| {
            upload_in_order(&h.service, "same.bin", "application/octet-stream", &data, &[2, 1, 0])
        });
        let records: Vec<FileRecord> = futures::future::join_all(uploads)
            .await
            .into_iter()
            .collect::<Result<_, _>>()
            .unwrap();

        let mut ids: Vec<_> = records.iter().map(|r| r.id.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 4);
        assert_eq!(h.service.registry().list().await.len(), 4);
        assert_eq!(h.blobs.asset_count(), 4);
    }

    #[tokio::test]
    async fn test_lookup_failure_propagates_and_is_retried_later() {
        let h = harness();
        h.blobs.set_fail_lookups(true);

        let result = h.service.upload_single("a.txt", None, b"x".to_vec()).await;
        assert!(matches!(result, Err(UploadError::BlobStore(_))));
        assert_eq!(h.blobs.create_attempts(), 0);

        h.blobs.set_fail_lookups(false);
        let record = h.service.upload_single("a.txt", None, b"x".to_vec()).await.unwrap();
        assert_eq!(record.mime_type, "text/plain");
    }

    #[tokio::test]
    async fn test_blob_failure_writes_no_record() {
        let h = small_chunks(4);
        h.blobs.set_fail_uploads(true);

        let result =
            upload_in_order(&h.service, "a.bin", "application/octet-stream", b"abcdef", &[1, 0])
                .await;
        assert!(matches!(result, Err(UploadError::BlobStore(_))));
        assert!(h.service.registry().list().await.is_empty());
        assert_eq!(h.sessions.count().await, 0);
    }

    #[tokio::test]
    async fn test_registry_delete_keeps_blob() {
        let h = harness();
        let record = h
            .service
            .upload_single("kept.txt", Some("text/plain"), b"still here".to_vec())
            .await
            .unwrap();

        assert!(h.service.registry().delete(&record.id).await.unwrap());
        assert!(h.service.registry().list().await.is_empty());
        assert_eq!(h.blobs.fetch(&record.blob_url).unwrap().data, b"still here");
    }

    #[tokio::test]
    async fn test_single_upload_limits() {
        let h = small_chunks(4);
        assert!(matches!(
            h.service.upload_single("a.bin", None, b"12345".to_vec()).await,
            Err(UploadError::Validation(_))
        ));
        assert!(matches!(
            h.service.upload_single("a.bin", None, Vec::new()).await,
            Err(UploadError::Validation(_))
        ));

        let record = h.service.upload_single("noext", None, b"1234".to_vec()).await.unwrap();
        assert_eq!(record.mime_type, "application/octet-stream");
        assert_eq!(record.size, 4);
    }

    #[tokio::test]
    async fn test_cancel_removes_session_and_chunks() {
        let h = small_chunks(4);
        let init = h
            .service
            .init(init_request("a.bin", 8, "application/octet-stream"))
            .await
            .unwrap();
        h.service.receive_chunk(&init.upload_id, 0, b"abcd", None).await.unwrap();

        h.service.cancel(&init.upload_id).await.unwrap();

        let id = parse_upload_id(&init.upload_id).unwrap();
        assert!(h.chunks.assemble_chunks(id, 1, 0).await.is_err());
        assert!(matches!(
            h.service.cancel(&init.upload_id).await,
            Err(UploadError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_init_sweeps_idle_sessions_when_ttl_set() {
        let h = harness_with(UploadConfig {
            chunk_size: 4,
            session_ttl_secs: Some(60),
            ..UploadConfig::default()
        });

        let old = init_request("old.bin", 4, "application/octet-stream");
        let mut stale = UploadSession::new(&old, 4, Utc::now());
        stale.last_activity = Utc::now() - Duration::minutes(5);
        let stale_id = stale.id;
        h.sessions.insert(stale).await.unwrap();
        h.chunks.store_chunk(stale_id, 0, b"abcd", None).await.unwrap();

        h.service
            .init(init_request("new.bin", 4, "application/octet-stream"))
            .await
            .unwrap();

        assert!(matches!(
            h.service.status(&stale_id.to_string()).await,
            Err(UploadError::SessionNotFound(_))
        ));
        assert!(h.chunks.assemble_chunks(stale_id, 1, 0).await.is_err());
        assert_eq!(h.sessions.count().await, 1);
    }

    #[tokio::test]
    async fn test_idle_sessions_kept_without_ttl() {
        let h = small_chunks(4);

        let old = init_request("old.bin", 4, "application/octet-stream");
        let mut stale = UploadSession::new(&old, 4, Utc::now());
        stale.last_activity = Utc::now() - Duration::days(2);
        h.sessions.insert(stale).await.unwrap();

        h.service
            .init(init_request("new.bin", 4, "application/octet-stream"))
            .await
            .unwrap();
        assert_eq!(h.sessions.count().await, 2);

        // Manual sweep still works
        assert_eq!(h.service.sweep_idle_sessions(Utc::now() - Duration::hours(1)).await, 1);
        assert_eq!(h.sessions.count().await, 1);
    }

    #[test]
    fn test_idle_cutoff_rejects_unrepresentable_ttl() {
        let now = Utc::now();
        assert_eq!(idle_cutoff(now, 60), Some(now - Duration::seconds(60)));
        assert_eq!(idle_cutoff(now, u64::MAX), None);
        assert_eq!(idle_cutoff(now, i64::MAX as u64), None);
    }

    #[tokio::test]
    async fn test_huge_ttl_never_sweeps_live_sessions() {
        let h = harness_with(UploadConfig {
            chunk_size: 4,
            session_ttl_secs: Some(u64::MAX),
            ..UploadConfig::default()
        });

        let first = h
            .service
            .init(init_request("first.bin", 4, "application/octet-stream"))
            .await
            .unwrap();
        h.service
            .init(init_request("second.bin", 4, "application/octet-stream"))
            .await
            .unwrap();

        assert!(h.service.status(&first.upload_id).await.is_ok());
        assert_eq!(h.sessions.count().await, 2);
    }

    /// Session store whose sessions disappear between the chunk write and
    /// the bookkeeping step, as when a cancel races an in-flight chunk
    struct VanishingSessions(MemorySessionStore);

    #[async_trait::async_trait]
    impl SessionStore for VanishingSessions {
        async fn insert(&self, session: UploadSession) -> Result<(), UploadError> {
            self.0.insert(session).await
        }

        async fn get(&self, id: Uuid) -> Result<UploadSession, UploadError> {
            self.0.get(id).await
        }

        async fn mark_chunk_received(
            &self,
            id: Uuid,
            _chunk_index: usize,
        ) -> Result<UploadSession, UploadError> {
            self.0.remove(id).await?;
            Err(UploadError::SessionNotFound(id.to_string()))
        }

        async fn remove(&self, id: Uuid) -> Result<UploadSession, UploadError> {
            self.0.remove(id).await
        }

        async fn idle_since(&self, cutoff: DateTime<Utc>) -> Vec<Uuid> {
            self.0.idle_since(cutoff).await
        }

        async fn count(&self) -> usize {
            self.0.count().await
        }
    }

    #[tokio::test]
    async fn test_chunk_for_vanished_session_is_discarded() {
        let chunks = ChunkStore::in_memory();
        let service = UploadService::new(
            Arc::new(VanishingSessions(MemorySessionStore::new())),
            chunks.clone(),
            Arc::new(MemoryBlobStore::new("memory://cdn")),
            FileRegistry::new(Arc::new(MemoryRegistryStore::new()), 14),
            "gallery",
            UploadConfig {
                chunk_size: 4,
                ..UploadConfig::default()
            },
        );

        let init = service
            .init(init_request("late.bin", 8, "application/octet-stream"))
            .await
            .unwrap();
        let id = parse_upload_id(&init.upload_id).unwrap();

        let result = service.receive_chunk(&init.upload_id, 1, b"late", None).await;
        assert!(matches!(result, Err(UploadError::SessionNotFound(_))));

        assert!(!chunks.delete_chunk(id, 1).await.unwrap());
        assert_eq!(chunks.delete_session_chunks(id).await.unwrap(), 0);
    }
}
