//! File record schema

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::RegistryError;

/// Metadata of one stored file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: String,
    pub original_name: String,
    /// Public asset name, unique per upload attempt
    pub stored_name: String,
    /// Size after compression
    pub size: u64,
    pub mime_type: String,
    pub upload_date: DateTime<Utc>,
    pub expiry_date: DateTime<Utc>,
    pub blob_url: String,
    pub compressed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression_ratio: Option<f64>,
}

impl FileRecord {
    /// Check the record invariants enforced at the registry boundary
    pub fn validate(&self) -> Result<(), RegistryError> {
        let required = [
            ("id", &self.id),
            ("originalName", &self.original_name),
            ("storedName", &self.stored_name),
            ("mimeType", &self.mime_type),
            ("blobUrl", &self.blob_url),
        ];
        if let Some((field, _)) = required.iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(RegistryError::Invalid(format!("{} must not be empty", field)));
        }

        if self.expiry_date <= self.upload_date {
            return Err(RegistryError::Invalid(format!(
                "expiryDate {} is not after uploadDate {}",
                self.expiry_date, self.upload_date
            )));
        }

        match self.compression_ratio {
            Some(ratio) if !self.compressed => Err(RegistryError::Invalid(format!(
                "compressionRatio {} set on an uncompressed file",
                ratio
            ))),
            Some(ratio) if !(0.0..1.0).contains(&ratio) => Err(RegistryError::Invalid(format!(
                "compressionRatio {} out of range",
                ratio
            ))),
            _ => Ok(()),
        }
    }

    /// Eligible for garbage collection at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry_date <= now
    }

    /// Still resolvable to its blob at `now`
    pub fn is_resolvable_at(&self, now: DateTime<Utc>) -> bool {
        now <= self.expiry_date
    }
}
