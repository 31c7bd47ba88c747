//! S3-compatible blob store
//!
//! Wraps the AWS SDK for S3-compatible storage access. The container tag maps
//! to a bucket name.

use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::{retry::RetryConfig, Credentials, Region},
    error::DisplayErrorContext,
    primitives::ByteStream,
    types::{BucketLocationConstraint, CreateBucketConfiguration},
    Client,
};

use crate::config::StorageConfig;
use crate::error::StorageError;

use super::blob_store::{public_url, BlobStore};
use super::types::{ContainerId, ContainerStatus};

/// Blobs are immutable, so they can be cached forever
const ASSET_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";

/// Region S3 treats as the implicit bucket location
const DEFAULT_REGION: &str = "us-east-1";

/// S3-compatible blob store
#[derive(Clone)]
pub struct S3BlobStore {
    client: Client,
    region: String,
    public_base_url: String,
}

impl S3BlobStore {
    /// Create a new S3 blob store from configuration
    pub fn new(config: &StorageConfig) -> Self {
        let region = region_of(config);
        let s3_config = sdk_config(config, &region).build();

        Self {
            client: Client::from_conf(s3_config),
            region,
            public_base_url: config.public_base_url.clone(),
        }
    }

    /// Location constraint for `CreateBucket`. Outside us-east-1, AWS rejects
    /// a create without one.
    fn bucket_configuration(&self) -> Option<CreateBucketConfiguration> {
        (self.region != DEFAULT_REGION).then(|| {
            CreateBucketConfiguration::builder()
                .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                .build()
        })
    }

    async fn lookup(&self, tag: &str) -> Result<bool, StorageError> {
        match self.client.head_bucket().bucket(tag).send().await {
            Ok(_) => Ok(true),
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_not_found() {
                    Ok(false)
                } else {
                    Err(StorageError::LookupFailed {
                        container: tag.to_string(),
                        message: DisplayErrorContext(&service_error).to_string(),
                    })
                }
            }
        }
    }
}

fn region_of(config: &StorageConfig) -> String {
    config
        .region
        .clone()
        .unwrap_or_else(|| DEFAULT_REGION.to_string())
}

fn sdk_config(config: &StorageConfig, region: &str) -> aws_sdk_s3::config::Builder {
    let credentials = Credentials::new(
        &config.access_key,
        &config.secret_key,
        None,
        None,
        "gallery-cdn",
    );

    aws_sdk_s3::Config::builder()
        .behavior_version(BehaviorVersion::latest())
        .endpoint_url(&config.endpoint)
        .region(Region::new(region.to_string()))
        .credentials_provider(credentials)
        .force_path_style(true) // Required for MinIO and other S3-compatible services
        .retry_config(RetryConfig::disabled())
}

#[async_trait::async_trait]
impl BlobStore for S3BlobStore {
    async fn ensure_container(&self, tag: &str) -> Result<ContainerStatus, StorageError> {
        let id = ContainerId::new(tag);

        if self.lookup(tag).await? {
            return Ok(ContainerStatus::AlreadyExists(id));
        }

        let create = self
            .client
            .create_bucket()
            .bucket(tag)
            .set_create_bucket_configuration(self.bucket_configuration());

        match create.send().await {
            Ok(_) => {
                tracing::info!(container = %tag, "Created blob container");
                Ok(ContainerStatus::Created(id))
            }
            Err(e) => {
                let service_error = e.into_service_error();
                let lost_race = service_error.is_bucket_already_owned_by_you()
                    || service_error.is_bucket_already_exists();

                // Another caller created it between our lookup and create
                if lost_race && self.lookup(tag).await? {
                    tracing::debug!(container = %tag, "Container created concurrently, reusing");
                    return Ok(ContainerStatus::AlreadyExists(id));
                }

                Err(StorageError::CreateFailed {
                    container: tag.to_string(),
                    message: DisplayErrorContext(&service_error).to_string(),
                })
            }
        }
    }

    async fn upload_asset(
        &self,
        container: &ContainerId,
        name: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StorageError> {
        let size = data.len();

        self.client
            .put_object()
            .bucket(container.as_str())
            .key(name)
            .body(ByteStream::from(data))
            .content_type(content_type)
            .cache_control(ASSET_CACHE_CONTROL)
            .send()
            .await
            .map_err(|e| StorageError::UploadFailed {
                name: name.to_string(),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        tracing::debug!(container = %container, name = %name, size = size, "Uploaded asset");

        Ok(public_url(&self.public_base_url, container, name))
    }
}
