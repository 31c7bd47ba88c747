//! Blob store trait and asset naming helpers

use std::path::Path;

use chrono::Utc;
use uuid::Uuid;

use crate::error::StorageError;

use super::types::{ContainerId, ContainerStatus};

/// Durable, append-only blob storage
#[async_trait::async_trait]
pub trait BlobStore: Send + Sync {
    /// Look up the container identified by `tag`, creating it only when the
    /// lookup reports "not found". Any other lookup failure is returned as-is.
    async fn ensure_container(&self, tag: &str) -> Result<ContainerStatus, StorageError>;

    /// Upload `data` as `name` in a single attempt and return its public URL
    async fn upload_asset(
        &self,
        container: &ContainerId,
        name: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StorageError>;
}

/// Build the public URL of an asset
pub fn public_url(base_url: &str, container: &ContainerId, name: &str) -> String {
    format!(
        "{}/{}/{}",
        base_url.trim_end_matches('/'),
        urlencoding::encode(container.as_str()),
        urlencoding::encode(name)
    )
}

/// Generate a unique asset name: `<unix-millis>-<8 hex>.<ext>`
///
/// Every call yields a fresh name, so a retried upload never overwrites the
/// remains of an earlier attempt.
pub fn generate_asset_name(original_name: &str, mime_type: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "{}-{}.{}",
        Utc::now().timestamp_millis(),
        &suffix[..8],
        asset_extension(original_name, mime_type)
    )
}

fn asset_extension(original_name: &str, mime_type: &str) -> String {
    let from_name = Path::new(original_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.len() <= 10)
        .filter(|ext| ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| ext.to_ascii_lowercase());

    from_name
        .or_else(|| {
            mime_guess::get_mime_extensions_str(mime_type)
                .and_then(|exts| exts.first())
                .map(|ext| ext.to_string())
        })
        .unwrap_or_else(|| "bin".to_string())
}
