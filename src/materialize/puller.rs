//! Concurrent materialization of remote content onto a scratch root.
//!
//! A [`Puller`] manages one materialization session: any number of
//! `pull*` calls followed by exactly one [`Puller::clean_up`]. Files are
//! materialized in one of three modes:
//!
//! - **eager copy**: content is fetched on a bounded worker pool before the
//!   pull returns;
//! - **pipe**: a named pipe is created in place of the file and a detached
//!   writer thread fetches content only once user code opens the read side;
//! - **empty file**: a zero-byte placeholder, no fetch at all.
//!
//! Pipe writers block in their write-side `open` until a reader appears, so
//! they cannot be joined at pull time; [`Puller::clean_up`] opens every
//! still-dangling pipe read-side non-blocking, which releases the writers,
//! then joins them all. User code is free to ignore any subset of its pipes.

use std::collections::HashSet;
use std::ffi::CString;
use std::fs::{DirBuilder, File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::os::unix::io::IntoRawFd;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use thiserror::Error;
use tracing::{debug, warn};

use crate::hashtree::{HashTree, OrderedTree, TreeError};
use crate::pathutil::{path_join, rel_path, scratch_path};
use crate::store::{ContentStore, FileInfo, FileRef, StoreError};

use super::limiter::{ErrorSlot, WorkerPool};
use super::size_writer::SizeWriter;

/// Default worker fan-out for eager copies.
pub const DEFAULT_PULL_CONCURRENCY: usize = 100;

/// Errors from materialization.
#[derive(Debug, Error)]
pub enum PullError {
    /// The content store failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A tree mirror rejected an update
    #[error(transparent)]
    Tree(#[from] TreeError),

    /// Local filesystem operation failed
    #[error("I/O error at {path:?}: {source}")]
    Io {
        /// The scratch path being materialized
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// A walked path was not under the pull root
    #[error("path {path:?} is not under {base:?}")]
    PathOutsideBase {
        /// The offending path
        path: String,
        /// The pull root it escaped
        base: String,
    },
}

/// Options for a pull.
///
/// `pipes` and `empty_files` are mutually exclusive; if both are set, pipe
/// mode wins. With both unset, content is copied eagerly.
#[derive(Debug, Clone)]
pub struct PullOptions {
    /// Materialize files as named pipes (lazy)
    pub pipes: bool,
    /// Materialize files as empty placeholders
    pub empty_files: bool,
    /// Worker threads for eager copies
    pub concurrency: usize,
}

impl Default for PullOptions {
    fn default() -> Self {
        Self {
            pipes: false,
            empty_files: false,
            concurrency: DEFAULT_PULL_CONCURRENCY,
        }
    }
}

impl PullOptions {
    /// Requests pipe (lazy) materialization.
    pub fn with_pipes(mut self) -> Self {
        self.pipes = true;
        self
    }

    /// Requests empty placeholder materialization.
    pub fn with_empty_files(mut self) -> Self {
        self.empty_files = true;
        self
    }

    /// Sets the eager-copy worker count.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }
}

type FetchFn = Box<dyn FnOnce(&mut dyn Write) -> Result<(), PullError> + Send + 'static>;

#[derive(Default)]
struct PipeSet {
    /// Pipes whose writer is still blocked in its write-side open
    open: HashSet<PathBuf>,
    /// Drain mode: writers released from now on skip their fetch
    cleaned: bool,
}

struct PullerState {
    pipes: Mutex<PipeSet>,
    /// Detached pipe writer threads, joined only by clean_up
    writers: Mutex<Vec<JoinHandle<()>>>,
    /// First background error; later ones are dropped
    first_err: ErrorSlot<PullError>,
    /// Bytes written by completed fetches
    size: AtomicU64,
}

impl PullerState {
    /// Creates the file at `path` and streams `fetch` into it.
    ///
    /// Bytes count toward the session total only if the fetch succeeds.
    fn make_file(
        &self,
        path: &Path,
        fetch: impl FnOnce(&mut dyn Write) -> Result<(), PullError>,
    ) -> Result<(), PullError> {
        make_parent_dirs(path)?;
        let file = File::create(path).map_err(|err| io_error(path, err))?;
        let mut writer = SizeWriter::new(file);
        fetch(&mut writer)?;
        writer.flush().map_err(|err| io_error(path, err))?;
        self.size.fetch_add(writer.written(), Ordering::Relaxed);
        Ok(())
    }

    /// Creates a FIFO at `path` and spawns its detached writer.
    fn make_pipe(state: &Arc<Self>, path: &Path, fetch: FetchFn) -> Result<(), PullError> {
        make_parent_dirs(path)?;
        mkfifo(path, 0o666)?;
        state.pipes.lock().unwrap().open.insert(path.to_path_buf());
        // The writer blocks in open until user code opens the read side, so
        // joining it here would deadlock; clean_up releases and joins it.
        let writer_state = Arc::clone(state);
        let pipe_path = path.to_path_buf();
        let handle = thread::Builder::new()
            .name("pipe-writer".to_string())
            .spawn(move || {
                if let Err(err) = writer_state.run_pipe_writer(&pipe_path, fetch) {
                    warn!(error = %err, "pipe writer failed");
                    writer_state.first_err.record(err);
                }
            })
            .map_err(|err| io_error(path, err))?;
        state.writers.lock().unwrap().push(handle);
        Ok(())
    }

    fn run_pipe_writer(&self, path: &Path, fetch: FetchFn) -> Result<(), PullError> {
        let file = OpenOptions::new()
            .write(true)
            .open(path)
            .map_err(|err| io_error(path, err))?;
        let cleaned = {
            let mut pipes = self.pipes.lock().unwrap();
            pipes.open.remove(path);
            pipes.cleaned
        };
        if cleaned {
            // Teardown released us; nobody wants the content.
            return close_file(file).map_err(|err| io_error(path, err));
        }
        let mut writer = SizeWriter::new(file);
        fetch(&mut writer)?;
        self.size.fetch_add(writer.written(), Ordering::Relaxed);
        close_file(writer.into_inner()).map_err(|err| io_error(path, err))
    }

    /// Dispatches one file to the mode selected by `opts`.
    fn materialize_file(
        state: &Arc<Self>,
        store: &Arc<dyn ContentStore>,
        path: PathBuf,
        src: FileRef,
        opts: &PullOptions,
        pool: &WorkerPool,
        pool_err: &Arc<ErrorSlot<PullError>>,
    ) -> Result<(), PullError> {
        if opts.pipes {
            let store = Arc::clone(store);
            return Self::make_pipe(
                state,
                &path,
                Box::new(move |w| {
                    store
                        .get_file(&src.repo, &src.commit, &src.path, 0, 0, w)
                        .map_err(PullError::from)
                }),
            );
        }
        if opts.empty_files {
            return state.make_file(&path, |_| Ok(()));
        }
        let state = Arc::clone(state);
        let store = Arc::clone(store);
        let pool_err = Arc::clone(pool_err);
        pool.submit(move || {
            let result = state.make_file(&path, |w| {
                store
                    .get_file(&src.repo, &src.commit, &src.path, 0, 0, w)
                    .map_err(PullError::from)
            });
            if let Err(err) = result {
                pool_err.record(err);
            }
        });
        Ok(())
    }
}

/// Materializer for one session of pulls.
///
/// Create one per datum, call `pull*` as needed, run the user code, then call
/// [`Puller::clean_up`] exactly once. Clean-up must not run concurrently with
/// a pull.
pub struct Puller {
    state: Arc<PullerState>,
}

impl Puller {
    /// Creates an idle puller.
    pub fn new() -> Self {
        Self {
            state: Arc::new(PullerState {
                pipes: Mutex::new(PipeSet::default()),
                writers: Mutex::new(Vec::new()),
                first_err: ErrorSlot::new(),
                size: AtomicU64::new(0),
            }),
        }
    }

    /// Materializes the tree at `(repo, commit, file)` under `root`.
    ///
    /// Every descendant lands at `root/<path relative to file>`; directories
    /// are created eagerly with mode 0700. When `stats_tree` is given, the
    /// walked metadata is mirrored under `stats_root`: directories as
    /// directory nodes, files with the union of their inspected object block
    /// refs and inline block refs.
    ///
    /// Eager copies complete before this returns; pipe writers live until
    /// [`Puller::clean_up`].
    #[allow(clippy::too_many_arguments)]
    pub fn pull(
        &self,
        store: &Arc<dyn ContentStore>,
        root: &Path,
        repo: &str,
        commit: &str,
        file: &str,
        opts: &PullOptions,
        mut stats_tree: Option<&mut OrderedTree>,
        stats_root: &str,
    ) -> Result<(), PullError> {
        debug!(repo, commit, file, pipes = opts.pipes, empty_files = opts.empty_files, "pull");
        let pool = WorkerPool::new("pull-worker", opts.concurrency);
        let pool_err = Arc::new(ErrorSlot::new());
        let mut stashed: Option<PullError> = None;
        let walk_result = store.walk(repo, commit, file, &mut |fi| {
            let step = (|| -> Result<(), PullError> {
                let rel = rel_path(file, &fi.file.path).ok_or_else(|| {
                    PullError::PathOutsideBase {
                        path: fi.file.path.clone(),
                        base: file.to_string(),
                    }
                })?;
                if let Some(tree) = stats_tree.as_deref_mut() {
                    record_stats(store.as_ref(), tree, stats_root, &rel, fi)?;
                }
                let path = scratch_path(root, &rel);
                if fi.is_dir() {
                    return make_dir_all(&path);
                }
                PullerState::materialize_file(
                    &self.state,
                    store,
                    path,
                    fi.file.clone(),
                    opts,
                    &pool,
                    &pool_err,
                )
            })();
            step.map_err(|err| {
                stashed = Some(err);
                StoreError::Aborted
            })
        });
        pool.finish();
        if let Some(err) = stashed {
            return Err(err);
        }
        walk_result?;
        match pool_err.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Materializes the difference between two references under `root`.
    ///
    /// With `new_only` every new file lands at `root/<rel>`; otherwise new
    /// files land under `root/new/` and old files under `root/old/`. The
    /// entries are mirrored into `tree` (under `tree_root`) when given.
    /// Mode selection and concurrency match [`Puller::pull`].
    #[allow(clippy::too_many_arguments)]
    pub fn pull_diff(
        &self,
        store: &Arc<dyn ContentStore>,
        root: &Path,
        new: &FileRef,
        old: &FileRef,
        new_only: bool,
        opts: &PullOptions,
        mut tree: Option<&mut dyn HashTree>,
        tree_root: &str,
    ) -> Result<(), PullError> {
        debug!(
            new = %format_args!("{}/{}:{}", new.repo, new.commit, new.path),
            old = %format_args!("{}/{}:{}", old.repo, old.commit, old.path),
            new_only,
            "pull diff"
        );
        let pool = WorkerPool::new("diff-worker", opts.concurrency);
        let pool_err = Arc::new(ErrorSlot::new());
        let (new_files, old_files) = store.diff_file(new, old)?;

        for fi in &new_files {
            let rel = rel_path(&new.path, &fi.file.path).ok_or_else(|| {
                PullError::PathOutsideBase {
                    path: fi.file.path.clone(),
                    base: new.path.clone(),
                }
            })?;
            if let Some(tree) = tree.as_deref_mut() {
                let tree_path = if new_only {
                    path_join(tree_root, &rel)
                } else {
                    path_join(&path_join(tree_root, "new"), &rel)
                };
                tree.put_file(&tree_path, &fi.objects, fi.size_bytes)?;
            }
            let path = if new_only {
                scratch_path(root, &rel)
            } else {
                scratch_path(&root.join("new"), &rel)
            };
            PullerState::materialize_file(
                &self.state,
                store,
                path,
                fi.file.clone(),
                opts,
                &pool,
                &pool_err,
            )?;
        }

        if !new_only {
            for fi in &old_files {
                let rel = rel_path(&old.path, &fi.file.path).ok_or_else(|| {
                    PullError::PathOutsideBase {
                        path: fi.file.path.clone(),
                        base: old.path.clone(),
                    }
                })?;
                if let Some(tree) = tree.as_deref_mut() {
                    tree.put_file(&path_join(&path_join(tree_root, "old"), &rel), &fi.objects, fi.size_bytes)?;
                }
                let path = scratch_path(&root.join("old"), &rel);
                PullerState::materialize_file(
                    &self.state,
                    store,
                    path,
                    fi.file.clone(),
                    opts,
                    &pool,
                    &pool_err,
                )?;
            }
        }

        pool.finish();
        match pool_err.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Materializes every file of an in-memory tree under `root`.
    ///
    /// Each file's content is fetched as the single concatenated stream of
    /// its objects.
    pub fn pull_tree(
        &self,
        store: &Arc<dyn ContentStore>,
        root: &Path,
        tree: &dyn HashTree,
        pipes: bool,
        concurrency: usize,
    ) -> Result<(), PullError> {
        let pool = WorkerPool::new("tree-worker", concurrency);
        let pool_err = Arc::new(ErrorSlot::new());
        let mut stashed: Option<PullError> = None;
        let walk_result = tree.walk("/", &mut |path, node| {
            let Some(file) = &node.file else {
                return Ok(());
            };
            let hashes: Vec<String> = file.objects.iter().map(|o| o.hash.clone()).collect();
            let total_size = node.size_bytes;
            let dest = scratch_path(root, path.trim_start_matches('/'));
            let step = if pipes {
                let store = Arc::clone(store);
                PullerState::make_pipe(
                    &self.state,
                    &dest,
                    Box::new(move |w| {
                        store
                            .get_objects(&hashes, 0, 0, total_size, w)
                            .map_err(PullError::from)
                    }),
                )
            } else {
                let state = Arc::clone(&self.state);
                let store = Arc::clone(store);
                let pool_err = Arc::clone(&pool_err);
                pool.submit(move || {
                    let result = state.make_file(&dest, |w| {
                        store
                            .get_objects(&hashes, 0, 0, total_size, w)
                            .map_err(PullError::from)
                    });
                    if let Err(err) = result {
                        pool_err.record(err);
                    }
                });
                Ok(())
            };
            step.map_err(|err| {
                stashed = Some(err);
                TreeError::Aborted
            })
        });
        pool.finish();
        if let Some(err) = stashed {
            return Err(err);
        }
        walk_result?;
        match pool_err.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Releases every dangling pipe writer, waits for all background work and
    /// reports the session's outcome.
    ///
    /// Returns the total bytes written by completed fetches and the first
    /// error observed by any background writer or during teardown itself.
    /// Must be called after user code has had its chance to open pipes, and
    /// never concurrently with a pull. Afterwards no background thread of
    /// this puller is alive and the byte counter is reset.
    pub fn clean_up(&self) -> (u64, Option<PullError>) {
        let mut result = self.state.first_err.take();

        // Open every still-registered FIFO read-side without blocking; each
        // open releases the writer stuck in its own write-side open.
        let mut readers: Vec<(PathBuf, File)> = Vec::new();
        {
            let mut pipes = self.state.pipes.lock().unwrap();
            pipes.cleaned = true;
            for path in pipes.open.drain() {
                match OpenOptions::new()
                    .read(true)
                    .custom_flags(libc::O_NONBLOCK)
                    .open(&path)
                {
                    Ok(file) => readers.push((path, file)),
                    Err(err) => {
                        warn!(path = %path.display(), error = %err, "failed to release pipe writer");
                        if result.is_none() {
                            result = Some(io_error(&path, err));
                        }
                    }
                }
            }
        }

        // Wait for every detached writer, released or already done.
        let writers: Vec<JoinHandle<()>> = {
            let mut writers = self.state.writers.lock().unwrap();
            writers.drain(..).collect()
        };
        for writer in writers {
            let _ = writer.join();
        }

        for (path, file) in readers {
            if let Err(err) = close_file(file) {
                if result.is_none() {
                    result = Some(io_error(&path, err));
                }
            }
        }

        let size = self.state.size.swap(0, Ordering::SeqCst);
        debug!(bytes = size, "clean up complete");
        (size, result)
    }
}

impl Default for Puller {
    fn default() -> Self {
        Self::new()
    }
}

/// Mirrors one walked node into the stats tree.
fn record_stats(
    store: &dyn ContentStore,
    tree: &mut OrderedTree,
    stats_root: &str,
    rel: &str,
    fi: &FileInfo,
) -> Result<(), PullError> {
    let stats_path = path_join(stats_root, rel);
    if fi.is_dir() {
        tree.put_dir(&stats_path);
        return Ok(());
    }
    let mut block_refs = Vec::with_capacity(fi.objects.len() + fi.block_refs.len());
    for object in &fi.objects {
        let info = store.inspect_object(&object.hash)?;
        block_refs.push(info.block_ref);
    }
    block_refs.extend(fi.block_refs.iter().cloned());
    tree.put_file(&stats_path, &fi.hash, fi.size_bytes, block_refs);
    Ok(())
}

fn make_dir_all(path: &Path) -> Result<(), PullError> {
    DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(path)
        .map_err(|err| io_error(path, err))
}

fn make_parent_dirs(path: &Path) -> Result<(), PullError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => make_dir_all(parent),
        _ => Ok(()),
    }
}

fn mkfifo(path: &Path, mode: libc::mode_t) -> Result<(), PullError> {
    let cpath = CString::new(path.as_os_str().as_bytes()).map_err(|_| {
        io_error(
            path,
            io::Error::new(io::ErrorKind::InvalidInput, "path contains a NUL byte"),
        )
    })?;
    if unsafe { libc::mkfifo(cpath.as_ptr(), mode) } != 0 {
        return Err(io_error(path, io::Error::last_os_error()));
    }
    Ok(())
}

/// Closes a file through `close(2)` so the error is observable.
fn close_file(file: File) -> io::Result<()> {
    let fd = file.into_raw_fd();
    if unsafe { libc::close(fd) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn io_error(path: &Path, source: io::Error) -> PullError {
    PullError::Io {
        path: path.to_path_buf(),
        source,
    }
}
