//! Materialization of remote content onto the local filesystem and back.
//!
//! [`Puller`] brings a datum's files onto a scratch root (eager copy, named
//! pipe, or empty placeholder) with bounded concurrency, byte accounting and
//! safe teardown. The push functions walk the other direction: local output
//! trees into an open commit, commits into an external blob store, and
//! single files with chunk-aligned resume.

mod limiter;
mod puller;
mod pusher;
mod size_writer;

pub use puller::{PullError, PullOptions, Puller, DEFAULT_PULL_CONCURRENCY};
pub use pusher::{push, push_file, push_file_chunked, push_obj, PushError};
pub use size_writer::SizeWriter;
