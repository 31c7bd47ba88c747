//! Upload types for the chunked ingestion protocol

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StorageError;
use crate::registry::RegistryError;

// ============================================================================
// Init Types
// ============================================================================

/// Request to open a chunked upload session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitRequest {
    /// Original file name
    pub file_name: String,

    /// Total file size in bytes
    pub file_size: u64,

    /// MIME type of the file
    pub mime_type: String,

    /// Optional: chunk count the client computed; must match the server's
    #[serde(default)]
    pub total_chunks: Option<usize>,
}

/// Response to an init request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitResponse {
    /// Upload session ID
    pub upload_id: String,

    /// Number of chunks the client must send
    pub total_chunks: usize,

    /// Size of every chunk but the last
    pub chunk_size: usize,
}

// ============================================================================
// Chunk Upload Types
// ============================================================================

/// Response after uploading a chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkUploadResponse {
    /// Chunk index that was stored
    pub chunk_index: usize,

    /// Number of distinct chunks received so far
    pub uploaded_chunks: usize,

    /// Total chunks expected
    pub total_chunks: usize,
}

// ============================================================================
// Complete Types
// ============================================================================

/// Request to assemble and store a finished upload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteRequest {
    /// Name to record; defaults to the session's file name
    #[serde(default)]
    pub original_name: Option<String>,

    /// MIME type to record; defaults to the session's MIME type
    #[serde(default)]
    pub mime_type: Option<String>,

    /// Expected assembled size
    #[serde(default)]
    pub total_size: Option<u64>,
}

/// Progress view of a session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusResponse {
    pub upload_id: String,
    pub file_name: String,
    pub uploaded_chunks: usize,
    pub total_chunks: usize,
    pub missing_chunks: Vec<usize>,
    pub progress: f64,
}

// ============================================================================
// Session Types
// ============================================================================

/// Upload session state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSession {
    /// Unique session ID
    pub id: Uuid,

    /// Original file name
    pub file_name: String,

    /// MIME type
    pub mime_type: String,

    /// Declared file size in bytes
    pub original_size: u64,

    /// Chunk size fixed for this upload
    pub chunk_size: usize,

    /// Number of chunks expected
    pub total_chunks: usize,

    /// Indices of chunks that have been received
    pub received_chunks: BTreeSet<usize>,

    /// Session creation time
    pub created_at: DateTime<Utc>,

    /// Last time a chunk arrived
    pub last_activity: DateTime<Utc>,
}

impl UploadSession {
    /// Create a new upload session
    pub fn new(request: &InitRequest, chunk_size: usize, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            file_name: request.file_name.clone(),
            mime_type: request.mime_type.clone(),
            original_size: request.file_size,
            chunk_size,
            total_chunks: chunk_count(request.file_size, chunk_size),
            received_chunks: BTreeSet::new(),
            created_at: now,
            last_activity: now,
        }
    }

    /// Check if all chunks have been received
    pub fn is_complete(&self) -> bool {
        self.received_chunks.len() == self.total_chunks
    }

    /// Get indices of chunks that still need to be uploaded
    pub fn missing_chunks(&self) -> Vec<usize> {
        (0..self.total_chunks)
            .filter(|i| !self.received_chunks.contains(i))
            .collect()
    }

    /// Mark a chunk as received; re-sending an index is a no-op
    pub fn mark_chunk_received(&mut self, index: usize, now: DateTime<Utc>) {
        self.received_chunks.insert(index);
        self.last_activity = now;
    }

    /// Fraction of chunks received, in [0, 1]
    pub fn progress(&self) -> f64 {
        if self.total_chunks == 0 {
            return 1.0;
        }
        self.received_chunks.len() as f64 / self.total_chunks as f64
    }

    pub fn status(&self) -> SessionStatusResponse {
        SessionStatusResponse {
            upload_id: self.id.to_string(),
            file_name: self.file_name.clone(),
            uploaded_chunks: self.received_chunks.len(),
            total_chunks: self.total_chunks,
            missing_chunks: self.missing_chunks(),
            progress: self.progress(),
        }
    }
}

/// Number of `chunk_size` chunks needed for `file_size` bytes
pub fn chunk_count(file_size: u64, chunk_size: usize) -> usize {
    file_size.div_ceil(chunk_size as u64) as usize
}

/// Parse an upload ID; malformed IDs are unknown sessions
pub fn parse_upload_id(upload_id: &str) -> Result<Uuid, UploadError> {
    Uuid::parse_str(upload_id).map_err(|_| UploadError::SessionNotFound(upload_id.to_string()))
}

// ============================================================================
// Error Types
// ============================================================================

/// Upload error types
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Incomplete upload: missing chunks {missing:?}")]
    IncompleteUpload { missing: Vec<usize> },

    #[error("Blob store error: {0}")]
    BlobStore(#[from] StorageError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Chunk storage error: {0}")]
    ChunkStorage(String),

    #[error("Caller is not allowed to perform this operation")]
    Unauthorized,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl UploadError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::SessionNotFound(_) => StatusCode::NOT_FOUND,
            Self::IncompleteUpload { .. } => StatusCode::CONFLICT,
            Self::BlobStore(_) => StatusCode::BAD_GATEWAY,
            Self::Registry(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ChunkStorage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable taxonomy tag returned to clients
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::SessionNotFound(_) => "SESSION_NOT_FOUND",
            Self::IncompleteUpload { .. } => "INCOMPLETE_UPLOAD",
            Self::BlobStore(_) => "BLOB_STORE_ERROR",
            Self::Registry(_) => "REGISTRY_ERROR",
            Self::ChunkStorage(_) => "CHUNK_STORAGE_ERROR",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}
