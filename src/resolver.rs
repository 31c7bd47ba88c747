//! Public name resolution
//!
//! Maps a stored name to its blob URL using registry state only; the blob
//! store is never queried.

use chrono::{DateTime, Utc};

use crate::registry::FileRegistry;

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("File not found or expired: {0}")]
    ExpiredOrNotFound(String),
}

#[derive(Clone)]
pub struct Resolver {
    registry: FileRegistry,
}

impl Resolver {
    pub fn new(registry: FileRegistry) -> Self {
        Self { registry }
    }

    pub async fn resolve(&self, stored_name: &str) -> Result<String, ResolveError> {
        self.resolve_at(stored_name, Utc::now()).await
    }

    pub async fn resolve_at(
        &self,
        stored_name: &str,
        now: DateTime<Utc>,
    ) -> Result<String, ResolveError> {
        match self.registry.find_by_stored_name(stored_name).await {
            Some(record) if record.is_resolvable_at(now) => Ok(record.blob_url),
            _ => Err(ResolveError::ExpiredOrNotFound(stored_name.to_string())),
        }
    }
}
