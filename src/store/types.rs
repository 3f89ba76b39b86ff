//! Core types shared across the content store surface.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Size of the fixed content-addressing unit, in bytes.
///
/// Files are stored as a sequence of objects of at most this many bytes;
/// chunk-aligned resume ([`crate::materialize::push_file`]) compares local
/// content against remote object hashes one chunk at a time.
pub const CHUNK_SIZE: u64 = 8 * 1024 * 1024;

/// Hex-encoded SHA-256 of one chunk of content.
///
/// This is the object hash convention used throughout the store surface.
pub fn hash_chunk(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// A file location within a commit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FileRef {
    /// Repository name
    pub repo: String,
    /// Commit id within the repository
    pub commit: String,
    /// Path within the commit, rooted at `/`
    pub path: String,
}

impl FileRef {
    /// Create a new file reference.
    pub fn new(repo: impl Into<String>, commit: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            repo: repo.into(),
            commit: commit.into(),
            path: path.into(),
        }
    }
}

/// An open commit, the target of push operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRef {
    /// Repository name
    pub repo: String,
    /// Commit id
    pub commit: String,
}

impl CommitRef {
    /// Create a new commit reference.
    pub fn new(repo: impl Into<String>, commit: impl Into<String>) -> Self {
        Self {
            repo: repo.into(),
            commit: commit.into(),
        }
    }
}

/// Whether a node in a commit is a regular file or a directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileType {
    /// Regular file
    #[default]
    #[serde(rename = "FILE")]
    File,
    /// Directory
    #[serde(rename = "DIR")]
    Dir,
}

/// A content-addressed object making up part of a file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ObjectRef {
    /// Object hash (see [`hash_chunk`])
    pub hash: String,
}

impl ObjectRef {
    /// Create a new object reference.
    pub fn new(hash: impl Into<String>) -> Self {
        Self { hash: hash.into() }
    }
}

/// A content-addressed pointer into the external block store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BlockRef {
    /// Block hash
    pub hash: String,
    /// Byte range start within the block
    pub lower: u64,
    /// Byte range end within the block
    pub upper: u64,
}

/// Metadata about a stored object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Where the object's bytes live in the block store
    pub block_ref: BlockRef,
}

/// Resolved metadata for one node of a commit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FileInfo {
    /// Location of the node
    pub file: FileRef,
    /// File or directory
    pub file_type: FileType,
    /// Content size; for directories, the total size of descendants
    pub size_bytes: u64,
    /// Content hash of the whole node
    pub hash: String,
    /// Objects making up the content, in order
    pub objects: Vec<ObjectRef>,
    /// Inline block references, if the content is stored directly
    pub block_refs: Vec<BlockRef>,
}

impl FileInfo {
    /// Returns true if this node is a directory.
    pub fn is_dir(&self) -> bool {
        self.file_type == FileType::Dir
    }
}

/// Errors surfaced by the content store surface.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The referenced file, commit or object does not exist
    #[error("{what} not found")]
    NotFound {
        /// Description of the missing entity, e.g. `repo/commit:/path`
        what: String,
    },

    /// I/O error while streaming content
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The glob pattern could not be compiled
    #[error(transparent)]
    Glob(#[from] crate::glob::GlobError),

    /// A caller-supplied callback aborted the operation.
    ///
    /// Adapters that drive caller callbacks with their own error type stash
    /// the caller's error, signal the store with this variant, then surface
    /// the stashed error. It should never escape to end users.
    #[error("operation aborted by caller")]
    Aborted,

    /// Any other store-side failure
    #[error("store error: {0}")]
    Other(String),
}

impl StoreError {
    /// Construct a [`StoreError::NotFound`] for a file reference.
    pub fn not_found(repo: &str, commit: &str, path: &str) -> Self {
        StoreError::NotFound {
            what: format!("{repo}/{commit}:{path}"),
        }
    }

    /// Structural test for the not-found condition.
    ///
    /// Callers must use this rather than matching on the error message.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}
