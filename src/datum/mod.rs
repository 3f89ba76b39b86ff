//! Datum enumeration.
//!
//! A *datum* is the unit of work handed to user code: a non-empty list of
//! resolved input entries, one per leaf of the input tree along one branch of
//! the cross-product. Iterators drive a callback once per datum rather than
//! handing out collections, so arbitrarily large inputs stream with only one
//! datum resident at a time.

mod fileset;
mod iterator;

pub use fileset::{encode_datum, FileSetIterator, INPUT_FILE_NAME};
pub use iterator::new_iterator;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::glob::GlobError;
use crate::store::{FileInfo, StoreError};

/// One resolved input file plus the attributes propagated from its source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InputEntry {
    /// Resolved metadata of the matched file
    pub file_info: FileInfo,
    /// Name of the source input
    pub name: String,
    /// Branch the source commit belongs to
    pub branch: String,
    /// Grouping key derived from the glob match
    pub join_on: String,
    /// Materialize as a named pipe
    pub lazy: bool,
    /// Materialize as an empty placeholder
    pub empty_files: bool,
    /// Expose through the S3 gateway
    pub s3: bool,
}

/// A datum: the non-empty, ordered list of entries yielded per callback.
pub type Datum = Vec<InputEntry>;

/// Errors from datum enumeration.
#[derive(Debug, Error)]
pub enum DatumError {
    /// The content store failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The input's glob could not be compiled
    #[error(transparent)]
    Glob(#[from] GlobError),

    /// A persisted sidecar member did not decode
    #[error("corrupt datum sidecar: {0}")]
    Sidecar(#[from] serde_json::Error),

    /// Reading the sidecar archive failed
    #[error("sidecar read error: {0}")]
    Io(#[from] std::io::Error),

    /// The input description names a kind with no iterator
    #[error("unrecognized input type: {0:?}")]
    UnsupportedInput(String),

    /// Downstream processing of a datum failed
    #[error("{0}")]
    Processing(String),
}

/// Callback invoked once per datum.
///
/// Returning an error aborts the iteration and propagates to the caller.
pub type DatumCallback<'a> = dyn FnMut(&[InputEntry]) -> Result<(), DatumError> + 'a;

/// Lazy producer of datums from an input description.
///
/// Iteration is single-pass and finite; the callback is never invoked
/// concurrently. Implementations are not restartable.
pub trait DatumIterator {
    /// Drives `cb` once per datum.
    fn iterate(&self, cb: &mut DatumCallback<'_>) -> Result<(), DatumError>;
}
