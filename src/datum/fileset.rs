//! Recovery of persisted datums.
//!
//! When a job's datums are decided they are persisted as a sidecar: a tar
//! archive whose members each hold one datum, encoded as a stream of JSON
//! entry messages. [`FileSetIterator`] replays that archive as a
//! [`DatumIterator`], which is how restarted workers recover the exact datum
//! set of an earlier run.

use std::sync::Arc;

use tracing::debug;

use crate::store::ContentStore;

use super::{DatumCallback, DatumError, DatumIterator, InputEntry};

/// File name of a persisted datum within its sidecar directory.
pub const INPUT_FILE_NAME: &str = "input";

/// Iterator over the datums persisted in a commit's sidecar.
pub struct FileSetIterator {
    store: Arc<dyn ContentStore>,
    repo: String,
    commit: String,
}

impl FileSetIterator {
    /// Creates an iterator over the sidecar stored in `(repo, commit)`.
    pub fn new(store: Arc<dyn ContentStore>, repo: impl Into<String>, commit: impl Into<String>) -> Self {
        Self {
            store,
            repo: repo.into(),
            commit: commit.into(),
        }
    }
}

impl DatumIterator for FileSetIterator {
    fn iterate(&self, cb: &mut DatumCallback<'_>) -> Result<(), DatumError> {
        let reader =
            self.store
                .get_tar(&self.repo, &self.commit, &format!("/*/{INPUT_FILE_NAME}"))?;
        let mut archive = tar::Archive::new(reader);
        for entry in archive.entries()? {
            let entry = entry?;
            let mut datum = Vec::new();
            for decoded in serde_json::Deserializer::from_reader(entry).into_iter::<InputEntry>() {
                datum.push(decoded?);
            }
            if datum.is_empty() {
                // A datum is non-empty by definition; nothing to yield.
                debug!(repo = %self.repo, commit = %self.commit, "skipping empty sidecar member");
                continue;
            }
            cb(&datum)?;
        }
        Ok(())
    }
}

/// Encodes a datum as one sidecar member body: a stream of JSON entries.
///
/// The writing dual of [`FileSetIterator`].
pub fn encode_datum(datum: &[InputEntry]) -> Result<Vec<u8>, DatumError> {
    let mut buf = Vec::new();
    for entry in datum {
        serde_json::to_writer(&mut buf, entry)?;
        buf.push(b'\n');
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FileInfo, FileRef, MemStore};

    fn entry(repo: &str, path: &str, join_on: &str) -> InputEntry {
        InputEntry {
            file_info: FileInfo {
                file: FileRef::new(repo, "c1", path),
                ..FileInfo::default()
            },
            name: repo.to_string(),
            join_on: join_on.to_string(),
            ..InputEntry::default()
        }
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let datum = vec![entry("a", "/x", "x"), entry("b", "/y", "y")];
        let encoded = encode_datum(&datum).unwrap();

        let decoded: Vec<InputEntry> = serde_json::Deserializer::from_slice(&encoded)
            .into_iter()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(decoded, datum);
    }

    #[test]
    fn test_iterates_every_member() {
        let store = MemStore::new();
        let d1 = vec![entry("a", "/x", "x"), entry("b", "/y", "y")];
        let d2 = vec![entry("a", "/z", "z")];
        store.put("job", "c1", "/0001/input", &encode_datum(&d1).unwrap());
        store.put("job", "c1", "/0002/input", &encode_datum(&d2).unwrap());
        // Files not matching the sidecar pattern are ignored.
        store.put("job", "c1", "/0001/stats", b"{}");

        let iterator = FileSetIterator::new(Arc::new(store), "job", "c1");
        let mut datums = Vec::new();
        iterator
            .iterate(&mut |datum| {
                datums.push(datum.to_vec());
                Ok(())
            })
            .unwrap();
        assert_eq!(datums, vec![d1, d2]);
    }

    #[test]
    fn test_empty_member_is_skipped() {
        let store = MemStore::new();
        store.put("job", "c1", "/0001/input", b"");
        store.put("job", "c1", "/0002/input", &encode_datum(&[entry("a", "/x", "x")]).unwrap());

        let iterator = FileSetIterator::new(Arc::new(store), "job", "c1");
        let mut count = 0;
        iterator
            .iterate(&mut |_| {
                count += 1;
                Ok(())
            })
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_corrupt_member_errors() {
        let store = MemStore::new();
        store.put("job", "c1", "/0001/input", b"{not json");

        let iterator = FileSetIterator::new(Arc::new(store), "job", "c1");
        let err = iterator.iterate(&mut |_| Ok(())).unwrap_err();
        assert!(matches!(err, DatumError::Sidecar(_)));
    }

    #[test]
    fn test_callback_error_aborts() {
        let store = MemStore::new();
        store.put("job", "c1", "/0001/input", &encode_datum(&[entry("a", "/x", "x")]).unwrap());
        store.put("job", "c1", "/0002/input", &encode_datum(&[entry("b", "/y", "y")]).unwrap());

        let iterator = FileSetIterator::new(Arc::new(store), "job", "c1");
        let mut seen = 0;
        let err = iterator
            .iterate(&mut |_| {
                seen += 1;
                Err(DatumError::Processing("stop".to_string()))
            })
            .unwrap_err();
        assert_eq!(seen, 1);
        assert!(matches!(err, DatumError::Processing(_)));
    }
}
