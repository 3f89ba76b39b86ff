//! Client traits consumed by the iteration and materialization layers.

use std::io::{Read, Write};

use super::types::{FileInfo, FileRef, ObjectInfo, StoreError};

/// Callback invoked once per file info during globbing and walking.
///
/// Returning an error aborts the operation and propagates it to the caller.
pub type FileInfoCallback<'a> = dyn FnMut(&FileInfo) -> Result<(), StoreError> + 'a;

/// Blocking client for the commit-addressed content store.
///
/// All streaming methods write into (or read from) caller-supplied buffers;
/// the store never touches the worker's filesystem itself. Implementations
/// must be safe to share across the materialization worker threads.
pub trait ContentStore: Send + Sync {
    /// Invokes `cb` once per file matching `pattern` within `(repo, commit)`.
    fn glob_file(
        &self,
        repo: &str,
        commit: &str,
        pattern: &str,
        cb: &mut FileInfoCallback<'_>,
    ) -> Result<(), StoreError>;

    /// Walks the tree rooted at `path` within `(repo, commit)`, invoking `cb`
    /// once per node (the root included).
    fn walk(
        &self,
        repo: &str,
        commit: &str,
        path: &str,
        cb: &mut FileInfoCallback<'_>,
    ) -> Result<(), StoreError>;

    /// Streams the content of `(repo, commit, path)` into `w`.
    ///
    /// `size == 0` means "to the end of the file".
    fn get_file(
        &self,
        repo: &str,
        commit: &str,
        path: &str,
        offset: u64,
        size: u64,
        w: &mut dyn Write,
    ) -> Result<(), StoreError>;

    /// Streams the concatenation of the named objects into `w`.
    ///
    /// `offset` and `size` window the concatenated stream; `total_size` is
    /// the full concatenated length, which lets implementations bound reads.
    fn get_objects(
        &self,
        hashes: &[String],
        offset: u64,
        size: u64,
        total_size: u64,
        w: &mut dyn Write,
    ) -> Result<(), StoreError>;

    /// Resolves an object hash to its block store location.
    fn inspect_object(&self, hash: &str) -> Result<ObjectInfo, StoreError>;

    /// Resolves `(repo, commit, path)` to its metadata.
    ///
    /// Returns [`StoreError::NotFound`] when the file does not exist; callers
    /// distinguish that case with [`StoreError::is_not_found`].
    fn inspect_file(&self, repo: &str, commit: &str, path: &str) -> Result<FileInfo, StoreError>;

    /// Diffs two file references.
    ///
    /// Returns `(new_files, old_files)`: files present or changed under the
    /// new reference, and files removed or changed relative to the old one.
    fn diff_file(
        &self,
        new: &FileRef,
        old: &FileRef,
    ) -> Result<(Vec<FileInfo>, Vec<FileInfo>), StoreError>;

    /// Writes `r` as the content of `(repo, commit, path)` in an open commit.
    ///
    /// Returns the number of bytes consumed.
    fn put_file(
        &self,
        repo: &str,
        commit: &str,
        path: &str,
        r: &mut dyn Read,
    ) -> Result<u64, StoreError>;

    /// Overwrites `(repo, commit, path)` from byte `offset` onward with `r`.
    ///
    /// Content before `offset` is preserved. Returns the number of bytes
    /// consumed.
    fn put_file_overwrite(
        &self,
        repo: &str,
        commit: &str,
        path: &str,
        r: &mut dyn Read,
        offset: u64,
    ) -> Result<u64, StoreError>;

    /// Deletes `(repo, commit, path)` from an open commit.
    fn delete_file(&self, repo: &str, commit: &str, path: &str) -> Result<(), StoreError>;

    /// Returns a tar stream of the files matching `pattern` in
    /// `(repo, commit)`.
    fn get_tar(
        &self,
        repo: &str,
        commit: &str,
        pattern: &str,
    ) -> Result<Box<dyn Read + Send>, StoreError>;
}

/// Writer factory for an external blob store.
///
/// Used to mirror a commit's files out of the platform (for example into an
/// S3 bucket). Writers are flushed before release; implementations surface
/// upload failures through `write`/`flush`.
pub trait ObjectStore: Send + Sync {
    /// Opens a writer for the blob at `path`.
    fn writer(&self, path: &str) -> Result<Box<dyn Write + Send>, StoreError>;
}
