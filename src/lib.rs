//! Gallery CDN
//!
//! Upload and lifecycle manager for a gallery CDN: clients push files in
//! fixed-size chunks, the server reassembles them, recompresses large images,
//! stores the result in an S3-compatible blob store and keeps an expiring
//! registry of what was stored.
//!
//! # Modules
//!
//! - `upload`: chunked ingestion protocol and the upload service
//! - `compression`: format-preserving image recompression
//! - `storage`: blob store abstraction (S3-compatible and in-memory)
//! - `registry`: file records, retention and lazy garbage collection
//! - `resolver`: stored name to blob URL resolution
//! - `auth`: authorization seam consumed by the HTTP layer

pub mod auth;
pub mod compression;
pub mod config;
pub mod db;
pub mod error;
pub mod registry;
pub mod resolver;
pub mod routes;
pub mod state;
pub mod storage;
pub mod upload;
