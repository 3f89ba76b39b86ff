//! Content store data model and client seams.
//!
//! The materialization core never talks to storage directly: everything it
//! reads or writes goes through the [`ContentStore`] trait (repo/commit/file
//! reads, globbing, walking, object fetch, diffing) or the [`ObjectStore`]
//! trait (external blob store writers). Production deployments implement
//! these against the platform's RPC client; [`MemStore`] is a complete
//! in-memory implementation used by the tests and for local development.

mod client;
mod mem;
mod types;

pub use client::{ContentStore, FileInfoCallback, ObjectStore};
pub use mem::{MemObjectStore, MemStore};
pub use types::{
    hash_chunk, BlockRef, CommitRef, FileInfo, FileRef, FileType, ObjectInfo, ObjectRef,
    StoreError, CHUNK_SIZE,
};
