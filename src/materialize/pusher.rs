//! Pushing local content back into the platform.
//!
//! The dual of pulling: [`push`] walks a local output tree into an open
//! commit, [`push_obj`] mirrors a commit into an external blob store, and
//! [`push_file`] synchronizes one file with chunk-aligned resume so only the
//! divergent suffix travels.

use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use thiserror::Error;
use tracing::debug;

use crate::pathutil::path_join;
use crate::store::{hash_chunk, CommitRef, ContentStore, FileRef, ObjectStore, StoreError, CHUNK_SIZE};

use super::limiter::{ErrorSlot, WorkerPool};

/// Upper bound on concurrent blob store uploads.
const OBJ_PUSH_CONCURRENCY: usize = 200;

/// Errors from push operations.
#[derive(Debug, Error)]
pub enum PushError {
    /// The content store failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Local filesystem operation failed
    #[error("I/O error at {path:?}: {source}")]
    Io {
        /// The local path involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// A walked local path escaped the push root
    #[error("path {path:?} is not under {root:?}")]
    PathOutsideRoot {
        /// The offending path
        path: PathBuf,
        /// The push root
        root: PathBuf,
    },
}

/// Puts every regular file under `root` into the open commit.
///
/// Uploads run in parallel, one thread per file; bounding the fan-out is the
/// caller's responsibility. With `overwrite`, each destination path is
/// deleted before the put so the commit ends up with exactly the local
/// content rather than an append.
pub fn push(
    store: &Arc<dyn ContentStore>,
    root: &Path,
    commit: &CommitRef,
    overwrite: bool,
) -> Result<(), PushError> {
    let mut files = Vec::new();
    collect_files(root, &mut files)?;
    debug!(repo = %commit.repo, commit = %commit.commit, files = files.len(), "push");

    let first_err = ErrorSlot::new();
    thread::scope(|scope| {
        for path in &files {
            let first_err = &first_err;
            scope.spawn(move || {
                if let Err(err) = push_one(store.as_ref(), root, path, commit, overwrite) {
                    first_err.record(err);
                }
            });
        }
    });
    match first_err.take() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn push_one(
    store: &dyn ContentStore,
    root: &Path,
    path: &Path,
    commit: &CommitRef,
    overwrite: bool,
) -> Result<(), PushError> {
    let rel = path
        .strip_prefix(root)
        .map_err(|_| PushError::PathOutsideRoot {
            path: path.to_path_buf(),
            root: root.to_path_buf(),
        })?
        .to_string_lossy()
        .into_owned();
    let mut file = File::open(path).map_err(|err| io_error(path, err))?;
    if overwrite {
        store.delete_file(&commit.repo, &commit.commit, &rel)?;
    }
    store.put_file(&commit.repo, &commit.commit, &rel, &mut file)?;
    Ok(())
}

/// Recursive local walk collecting regular files.
fn collect_files(dir: &Path, files: &mut Vec<PathBuf>) -> Result<(), PushError> {
    for entry in fs::read_dir(dir).map_err(|err| io_error(dir, err))? {
        let entry = entry.map_err(|err| io_error(dir, err))?;
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, files)?;
        } else {
            files.push(path);
        }
    }
    Ok(())
}

/// Mirrors every file of a commit into the blob store under `root/<path>`.
///
/// At most [`OBJ_PUSH_CONCURRENCY`] uploads run at a time.
pub fn push_obj(
    store: &Arc<dyn ContentStore>,
    commit: &CommitRef,
    objects: &Arc<dyn ObjectStore>,
    root: &str,
) -> Result<(), PushError> {
    let mut files = Vec::new();
    store.walk(&commit.repo, &commit.commit, "", &mut |fi| {
        if !fi.is_dir() {
            files.push(fi.clone());
        }
        Ok(())
    })?;
    debug!(repo = %commit.repo, commit = %commit.commit, files = files.len(), "push to blob store");

    let pool = WorkerPool::new("obj-push", files.len().clamp(1, OBJ_PUSH_CONCURRENCY));
    let first_err = Arc::new(ErrorSlot::new());
    for fi in files {
        let store = Arc::clone(store);
        let objects = Arc::clone(objects);
        let first_err = Arc::clone(&first_err);
        let dest = path_join(root, fi.file.path.trim_start_matches('/'));
        pool.submit(move || {
            let result = (|| -> Result<(), PushError> {
                let mut writer = objects.writer(&dest)?;
                store.get_file(&fi.file.repo, &fi.file.commit, &fi.file.path, 0, 0, &mut *writer)?;
                writer.flush().map_err(|err| PushError::Io {
                    path: PathBuf::from(&dest),
                    source: err,
                })?;
                Ok(())
            })();
            if let Err(err) = result {
                first_err.record(err);
            }
        });
    }
    pool.finish();
    match first_err.take() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Synchronizes the remote file with `local` using the default chunk size.
pub fn push_file<R: Read + Seek>(
    store: &dyn ContentStore,
    file: &FileRef,
    local: &mut R,
) -> Result<(), PushError> {
    push_file_chunked(store, file, local, CHUNK_SIZE)
}

/// Synchronizes the remote file with `local`, resuming at the first chunk
/// whose hash diverges from the remote object list.
///
/// The remote file is inspected first; a missing file means a full push. The
/// local content is then hashed one `chunk_size` read at a time against the
/// successive remote object hashes, stopping at the first divergence or at
/// the end of either side, and the overwrite is issued from that byte offset.
pub fn push_file_chunked<R: Read + Seek>(
    store: &dyn ContentStore,
    file: &FileRef,
    local: &mut R,
    chunk_size: u64,
) -> Result<(), PushError> {
    let info = match store.inspect_file(&file.repo, &file.commit, &file.path) {
        Ok(info) => Some(info),
        Err(err) if err.is_not_found() => None,
        Err(err) => return Err(err.into()),
    };

    let mut matched: u64 = 0;
    if let Some(info) = info {
        let mut chunk = Vec::new();
        for object in &info.objects {
            chunk.clear();
            let n = local
                .by_ref()
                .take(chunk_size)
                .read_to_end(&mut chunk)
                .map_err(|err| io_error(Path::new(&file.path), err))?;
            if (n as u64) < chunk_size {
                // Local content ends inside this chunk.
                break;
            }
            if object.hash != hash_chunk(&chunk) {
                break;
            }
            matched += 1;
        }
    }

    let offset = matched * chunk_size;
    debug!(path = %file.path, offset, "push file");
    local
        .seek(SeekFrom::Start(offset))
        .map_err(|err| io_error(Path::new(&file.path), err))?;
    store.put_file_overwrite(&file.repo, &file.commit, &file.path, local, offset)?;
    Ok(())
}

fn io_error(path: &Path, source: io::Error) -> PushError {
    PushError::Io {
        path: path.to_path_buf(),
        source,
    }
}
