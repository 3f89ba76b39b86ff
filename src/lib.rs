//! Datumflow - datum enumeration and materialization for commit-addressed
//! data pipelines.
//!
//! This library is the worker-side core of a data-processing platform. It
//! expands a compositional description of input sources ([`input::InputSpec`])
//! into a lazy stream of *datums*, the units of work handed to user code,
//! and materializes each datum's files from a remote content store onto a
//! local scratch directory so user code can consume them as ordinary paths.
//!
//! # High-Level Flow
//!
//! ```ignore
//! use datumflow::datum::new_iterator;
//! use datumflow::materialize::{Puller, PullOptions};
//!
//! let iter = new_iterator(store.clone(), &spec)?;
//! iter.iterate(&mut |datum| {
//!     let puller = Puller::new();
//!     for entry in datum {
//!         puller.pull(&store, &scratch, &entry.file_info.file.repo,
//!                     &entry.file_info.file.commit, &entry.file_info.file.path,
//!                     &PullOptions::default(), None, "")?;
//!     }
//!     // ... run user code against the scratch directory ...
//!     let (bytes, err) = puller.clean_up();
//!     Ok(())
//! })?;
//! ```
//!
//! Materialized content is scratch: it is not durable and is expected to be
//! deleted by the caller after clean-up.

pub mod datum;
pub mod glob;
pub mod hashtree;
pub mod input;
pub mod materialize;
mod pathutil;
pub mod store;

/// Version of the datumflow library.
///
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
