//! File registry
//!
//! Durable metadata index mapping stored files to their blob URL and expiry.
//! A record is only ever written after its blob upload succeeded, and
//! deleting a record never touches the blob.
//!
//! Expired records are reclaimed lazily: `list()` and `create()` run a
//! collection pass first, there is no background scheduler.

mod gc;
mod record;
mod sqlite;
mod store;

pub use gc::{collect_expired, GcOutcome};
pub use record::FileRecord;
pub use sqlite::SqliteRegistryStore;
pub use store::{MemoryRegistryStore, RegistryStore};

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::config::MAX_RETENTION_DAYS;

/// Registry error types
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Duplicate file ID: {0}")]
    DuplicateId(String),

    #[error("Invalid file record: {0}")]
    Invalid(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Registry backend error: {0}")]
    Backend(String),
}

// ============================================================================
// File Registry
// ============================================================================

/// Registry front: validation, retention and lazy garbage collection over a
/// pluggable `RegistryStore`
#[derive(Clone)]
pub struct FileRegistry {
    store: Arc<dyn RegistryStore>,
    retention: Duration,
}

impl FileRegistry {
    pub fn new(store: Arc<dyn RegistryStore>, retention_days: i64) -> Self {
        Self {
            store,
            retention: Duration::days(retention_days.clamp(1, MAX_RETENTION_DAYS)),
        }
    }

    /// How long a stored file stays resolvable
    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Insert a new record
    pub async fn create(&self, record: FileRecord) -> Result<FileRecord, RegistryError> {
        self.create_at(record, Utc::now()).await
    }

    pub async fn create_at(
        &self,
        record: FileRecord,
        now: DateTime<Utc>,
    ) -> Result<FileRecord, RegistryError> {
        record.validate()?;

        if let Err(e) = self.collect_expired_at(now).await {
            tracing::warn!(error = %e, "Garbage collection before create failed");
        }

        self.store.insert(&record).await?;

        tracing::info!(
            id = %record.id,
            stored_name = %record.stored_name,
            expiry_date = %record.expiry_date,
            "File registered"
        );

        Ok(record)
    }

    /// All live records, newest first
    pub async fn list(&self) -> Vec<FileRecord> {
        self.list_at(Utc::now()).await
    }

    pub async fn list_at(&self, now: DateTime<Utc>) -> Vec<FileRecord> {
        if let Err(e) = self.collect_expired_at(now).await {
            tracing::warn!(error = %e, "Garbage collection before list failed");
        }

        let records = match self.store.all().await {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(error = %e, "Registry read failed, returning empty listing");
                return Vec::new();
            }
        };

        // A failed GC delete must not make an expired record visible
        let mut live = collect_expired(now, records).survivors;
        live.sort_by(|a, b| b.upload_date.cmp(&a.upload_date));
        live
    }

    /// Get a record by ID
    pub async fn get(&self, id: &str) -> Option<FileRecord> {
        match self.store.get(id).await {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(id = %id, error = %e, "Registry read failed");
                None
            }
        }
    }

    /// Get a record by its public stored name
    pub async fn find_by_stored_name(&self, stored_name: &str) -> Option<FileRecord> {
        match self.store.find_by_stored_name(stored_name).await {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(stored_name = %stored_name, error = %e, "Registry read failed");
                None
            }
        }
    }

    /// Remove a record. The blob it points at is left in place.
    pub async fn delete(&self, id: &str) -> Result<bool, RegistryError> {
        let removed = self.store.remove(id).await?;
        if removed {
            tracing::info!(id = %id, "File record deleted");
        }
        Ok(removed)
    }

    /// Delete every record whose expiry date has passed
    pub async fn collect_expired(&self) -> Result<usize, RegistryError> {
        self.collect_expired_at(Utc::now()).await
    }

    pub async fn collect_expired_at(&self, now: DateTime<Utc>) -> Result<usize, RegistryError> {
        let records = self.store.all().await?;
        let GcOutcome { expired, .. } = collect_expired(now, records);

        let mut collected = 0;
        for record in &expired {
            if self.store.remove(&record.id).await? {
                collected += 1;
            }
        }

        if collected > 0 {
            tracing::info!(count = collected, "Collected expired file records");
        }

        Ok(collected)
    }
}

// ============================================================================
// Tests
// ============================================================================
