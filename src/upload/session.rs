//! Upload session store
//!
//! Sessions are reached only through the `SessionStore` trait so the
//! registry can live in process memory or in an external cache shared by
//! several server processes. Each operation is scoped to one upload ID.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::types::{UploadError, UploadSession};

// ============================================================================
// Session Store Trait
// ============================================================================

/// Storage for in-flight upload sessions
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    /// Register a new session
    async fn insert(&self, session: UploadSession) -> Result<(), UploadError>;

    /// Get a session by ID
    async fn get(&self, id: Uuid) -> Result<UploadSession, UploadError>;

    /// Record that a chunk index arrived and return the updated session
    async fn mark_chunk_received(
        &self,
        id: Uuid,
        chunk_index: usize,
    ) -> Result<UploadSession, UploadError>;

    /// Remove a session, returning it
    async fn remove(&self, id: Uuid) -> Result<UploadSession, UploadError>;

    /// IDs of sessions with no activity since `cutoff`
    async fn idle_since(&self, cutoff: DateTime<Utc>) -> Vec<Uuid>;

    /// Number of live sessions
    async fn count(&self) -> usize;
}

// ============================================================================
// In-Memory Store
// ============================================================================

/// Process-local session store
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    inner: Arc<RwLock<HashMap<Uuid, UploadSession>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl SessionStore for MemorySessionStore {
    async fn insert(&self, session: UploadSession) -> Result<(), UploadError> {
        let mut sessions = self.inner.write().await;
        if sessions.contains_key(&session.id) {
            return Err(UploadError::Internal(format!(
                "Session ID collision: {}",
                session.id
            )));
        }
        sessions.insert(session.id, session);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<UploadSession, UploadError> {
        let sessions = self.inner.read().await;
        sessions
            .get(&id)
            .cloned()
            .ok_or_else(|| UploadError::SessionNotFound(id.to_string()))
    }

    async fn mark_chunk_received(
        &self,
        id: Uuid,
        chunk_index: usize,
    ) -> Result<UploadSession, UploadError> {
        let mut sessions = self.inner.write().await;

        let session = sessions
            .get_mut(&id)
            .ok_or_else(|| UploadError::SessionNotFound(id.to_string()))?;

        if chunk_index >= session.total_chunks {
            return Err(UploadError::Validation(format!(
                "Chunk index {} out of range (total chunks: {})",
                chunk_index, session.total_chunks
            )));
        }

        session.mark_chunk_received(chunk_index, Utc::now());
        Ok(session.clone())
    }

    async fn remove(&self, id: Uuid) -> Result<UploadSession, UploadError> {
        let mut sessions = self.inner.write().await;
        sessions
            .remove(&id)
            .ok_or_else(|| UploadError::SessionNotFound(id.to_string()))
    }

    async fn idle_since(&self, cutoff: DateTime<Utc>) -> Vec<Uuid> {
        let sessions = self.inner.read().await;
        sessions
            .values()
            .filter(|s| s.last_activity < cutoff)
            .map(|s| s.id)
            .collect()
    }

    async fn count(&self) -> usize {
        self.inner.read().await.len()
    }
}

// ============================================================================
// Tests
// ============================================================================
