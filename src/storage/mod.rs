//! Blob store module
//!
//! The blob store is the system of record for file bytes. Assets are written
//! once into a single lazily created container and never deleted here.
//! Supports MinIO, Cloudflare R2, Backblaze B2 and AWS S3, plus an in-memory
//! backend for tests and local development.

mod blob_store;
mod memory;
mod s3_client;
mod types;

pub use blob_store::{generate_asset_name, public_url, BlobStore};
pub use memory::MemoryBlobStore;
pub use s3_client::S3BlobStore;
pub use types::*;
