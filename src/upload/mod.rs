//! Chunked Upload Module
//!
//! Lets clients push files larger than a single request allows:
//! - fixed-size chunks, independently stored and idempotent per index
//! - ordered reassembly once every index has arrived
//! - a single-shot path for files that fit in one chunk
//!
//! Protocol Flow:
//! 1. Client calls init with name, size and MIME type
//! 2. Server answers with an upload ID and the chunk size to use
//! 3. Client sends chunks in any order
//! 4. Client calls complete; the server assembles, compresses, stores the
//!    blob and returns the file record
//!
//! Identical concurrent uploads are never deduplicated; each yields its own
//! record.

pub mod chunk_store;
pub mod service;
pub mod session;
pub mod types;

pub use chunk_store::{
    compute_hash, ChunkStorage, ChunkStore, LocalChunkStorage, MemoryChunkStorage,
};
pub use service::UploadService;
pub use session::{MemorySessionStore, SessionStore};
pub use types::*;
