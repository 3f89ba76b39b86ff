//! Iterators over the input algebra.

use std::sync::Arc;

use crate::glob::CompiledGlob;
use crate::input::{InputSpec, PfsInput};
use crate::store::{ContentStore, StoreError};

use super::{DatumCallback, DatumError, DatumIterator, InputEntry};

/// Builds the iterator for an input description.
///
/// Construction is recursive over the spec tree; `Join` and `Git` inputs are
/// rejected with [`DatumError::UnsupportedInput`].
pub fn new_iterator(
    store: Arc<dyn ContentStore>,
    spec: &InputSpec,
) -> Result<Box<dyn DatumIterator>, DatumError> {
    match spec {
        InputSpec::Pfs(input) => Ok(Box::new(PfsIterator::new(store, input.clone()))),
        InputSpec::Cron(input) => Ok(Box::new(PfsIterator::new(store, input.desugar()))),
        InputSpec::Union(children) => Ok(Box::new(UnionIterator {
            iterators: child_iterators(store, children)?,
        })),
        InputSpec::Cross(children) => Ok(Box::new(CrossIterator {
            iterators: child_iterators(store, children)?,
        })),
        InputSpec::Join(_) | InputSpec::Git(_) => {
            Err(DatumError::UnsupportedInput(spec.kind().to_string()))
        }
    }
}

fn child_iterators(
    store: Arc<dyn ContentStore>,
    children: &[InputSpec],
) -> Result<Vec<Box<dyn DatumIterator>>, DatumError> {
    children
        .iter()
        .map(|child| new_iterator(Arc::clone(&store), child))
        .collect()
}

/// Leaf iterator: one single-entry datum per glob match.
struct PfsIterator {
    store: Arc<dyn ContentStore>,
    input: PfsInput,
}

impl PfsIterator {
    fn new(store: Arc<dyn ContentStore>, input: PfsInput) -> Self {
        Self { store, input }
    }
}

impl DatumIterator for PfsIterator {
    fn iterate(&self, cb: &mut DatumCallback<'_>) -> Result<(), DatumError> {
        if self.input.commit.is_empty() {
            // A trigger can fire before every branch has a commit; such an
            // input contributes nothing.
            return Ok(());
        }
        let glob = CompiledGlob::compile(&self.input.glob)?;
        let input = &self.input;
        let mut stashed: Option<DatumError> = None;
        let result = self.store.glob_file(
            &input.repo,
            &input.commit,
            &input.glob,
            &mut |fi| {
                let entry = InputEntry {
                    file_info: fi.clone(),
                    name: input.name.clone(),
                    branch: input.branch.clone(),
                    join_on: glob.replace(&fi.file.path, &input.join_on),
                    lazy: input.lazy,
                    empty_files: input.empty_files,
                    s3: input.s3,
                };
                match cb(std::slice::from_ref(&entry)) {
                    Ok(()) => Ok(()),
                    Err(err) => {
                        stashed = Some(err);
                        Err(StoreError::Aborted)
                    }
                }
            },
        );
        if let Some(err) = stashed {
            return Err(err);
        }
        result.map_err(DatumError::from)
    }
}

/// Concatenates the children's datums in declaration order.
///
/// Duplicates across children are preserved; merging the children to keep a
/// lexicographic order is future work.
struct UnionIterator {
    iterators: Vec<Box<dyn DatumIterator>>,
}

impl DatumIterator for UnionIterator {
    fn iterate(&self, cb: &mut DatumCallback<'_>) -> Result<(), DatumError> {
        for iterator in &self.iterators {
            iterator.iterate(cb)?;
        }
        Ok(())
    }
}

/// Cartesian product of the children's datums.
///
/// Child 0 varies slowest. The product is enumerated recursively with a
/// single accumulator that is truncated on backtrack, so memory is bounded by
/// the tree depth rather than the product size.
struct CrossIterator {
    iterators: Vec<Box<dyn DatumIterator>>,
}

impl DatumIterator for CrossIterator {
    fn iterate(&self, cb: &mut DatumCallback<'_>) -> Result<(), DatumError> {
        let mut acc = Vec::new();
        iterate_product(&mut acc, &self.iterators, cb)
    }
}

fn iterate_product(
    acc: &mut Vec<InputEntry>,
    iterators: &[Box<dyn DatumIterator>],
    cb: &mut DatumCallback<'_>,
) -> Result<(), DatumError> {
    let Some((first, rest)) = iterators.split_first() else {
        return cb(acc.as_slice());
    };
    first.iterate(&mut |entries| {
        let mark = acc.len();
        acc.extend_from_slice(entries);
        let result = iterate_product(&mut *acc, rest, &mut *cb);
        acc.truncate(mark);
        result
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemStore;

    fn seeded_store() -> Arc<dyn ContentStore> {
        let store = MemStore::with_chunk_size(16);
        store.put("alpha", "ca", "/a", b"a");
        store.put("beta", "cb", "/b1", b"b1");
        store.put("beta", "cb", "/b2", b"b2");
        store.put("gamma", "cg", "/g1", b"g1");
        store.put("gamma", "cg", "/g2", b"g2");
        store.put("gamma", "cg", "/g3", b"g3");
        Arc::new(store)
    }

    fn pfs(name: &str, repo: &str, commit: &str) -> InputSpec {
        InputSpec::Pfs(PfsInput::new(name, repo, "/*").with_commit(commit))
    }

    fn collect(store: Arc<dyn ContentStore>, spec: &InputSpec) -> Vec<Vec<String>> {
        let iterator = new_iterator(store, spec).unwrap();
        let mut datums = Vec::new();
        iterator
            .iterate(&mut |datum| {
                datums.push(datum.iter().map(|e| e.file_info.file.path.clone()).collect());
                Ok(())
            })
            .unwrap();
        datums
    }

    #[test]
    fn test_pfs_yields_single_entry_datums() {
        let datums = collect(seeded_store(), &pfs("b", "beta", "cb"));
        assert_eq!(datums, vec![vec!["/b1".to_string()], vec!["/b2".to_string()]]);
    }

    #[test]
    fn test_pfs_empty_commit_yields_nothing() {
        let spec = InputSpec::Pfs(PfsInput::new("a", "alpha", "/*"));
        let datums = collect(seeded_store(), &spec);
        assert!(datums.is_empty());
    }

    #[test]
    fn test_pfs_propagates_attributes_and_join_key() {
        let store = seeded_store();
        let spec = InputSpec::Pfs(
            PfsInput::new("b", "beta", "/*")
                .with_commit("cb")
                .with_branch("master")
                .with_join_on("$1")
                .lazy(),
        );
        let iterator = new_iterator(store, &spec).unwrap();
        let mut entries = Vec::new();
        iterator
            .iterate(&mut |datum| {
                entries.extend(datum.iter().cloned());
                Ok(())
            })
            .unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "b");
        assert_eq!(entries[0].branch, "master");
        assert_eq!(entries[0].join_on, "b1");
        assert_eq!(entries[1].join_on, "b2");
        assert!(entries[0].lazy);
    }

    #[test]
    fn test_cron_desugars_and_iterates() {
        let store = seeded_store();
        let spec = InputSpec::Cron(crate::input::CronInput::new("tick", "alpha", "ca"));
        let datums = collect(store, &spec);
        assert_eq!(datums, vec![vec!["/a".to_string()]]);
    }

    #[test]
    fn test_union_concatenates_in_declaration_order() {
        let spec = InputSpec::Union(vec![
            pfs("b", "beta", "cb"),
            pfs("a", "alpha", "ca"),
            // Repeating a child shows duplicates are preserved.
            pfs("b", "beta", "cb"),
        ]);
        let datums = collect(seeded_store(), &spec);
        assert_eq!(
            datums,
            vec![
                vec!["/b1".to_string()],
                vec!["/b2".to_string()],
                vec!["/a".to_string()],
                vec!["/b1".to_string()],
                vec!["/b2".to_string()],
            ]
        );
    }

    #[test]
    fn test_cross_product_order() {
        // Child 0 has one datum, child 1 has two: the product is exactly
        // [{a, b1}, {a, b2}], child 0 varying slowest.
        let spec = InputSpec::Cross(vec![pfs("a", "alpha", "ca"), pfs("b", "beta", "cb")]);
        let datums = collect(seeded_store(), &spec);
        assert_eq!(
            datums,
            vec![
                vec!["/a".to_string(), "/b1".to_string()],
                vec!["/a".to_string(), "/b2".to_string()],
            ]
        );
    }

    #[test]
    fn test_cross_cardinality_and_width() {
        let spec = InputSpec::Cross(vec![
            pfs("a", "alpha", "ca"),
            pfs("b", "beta", "cb"),
            pfs("g", "gamma", "cg"),
        ]);
        let datums = collect(seeded_store(), &spec);
        assert_eq!(datums.len(), 1 * 2 * 3);
        assert!(datums.iter().all(|d| d.len() == 3));
        // The last child varies fastest.
        assert_eq!(datums[0][2], "/g1");
        assert_eq!(datums[1][2], "/g2");
        assert_eq!(datums[2][2], "/g3");
        assert_eq!(datums[3][2], "/g1");
    }

    #[test]
    fn test_cross_with_empty_child_yields_nothing() {
        let spec = InputSpec::Cross(vec![
            pfs("b", "beta", "cb"),
            // Empty commit: contributes zero datums, so the product is empty.
            InputSpec::Pfs(PfsInput::new("a", "alpha", "/*")),
        ]);
        let datums = collect(seeded_store(), &spec);
        assert!(datums.is_empty());
    }

    #[test]
    fn test_nested_cross_of_union() {
        let spec = InputSpec::Cross(vec![
            InputSpec::Union(vec![pfs("a", "alpha", "ca"), pfs("b", "beta", "cb")]),
            pfs("g", "gamma", "cg"),
        ]);
        let datums = collect(seeded_store(), &spec);
        // (1 + 2) * 3 datums, each two entries wide.
        assert_eq!(datums.len(), 9);
        assert!(datums.iter().all(|d| d.len() == 2));
        assert_eq!(datums[0], vec!["/a".to_string(), "/g1".to_string()]);
        assert_eq!(datums[3], vec!["/b1".to_string(), "/g1".to_string()]);
    }

    #[test]
    fn test_callback_error_aborts_iteration() {
        let store = seeded_store();
        let iterator = new_iterator(store, &pfs("g", "gamma", "cg")).unwrap();
        let mut seen = 0;
        let err = iterator
            .iterate(&mut |_| {
                seen += 1;
                Err(DatumError::Processing("user code failed".to_string()))
            })
            .unwrap_err();
        assert_eq!(seen, 1);
        assert!(matches!(err, DatumError::Processing(_)));
    }

    #[test]
    fn test_store_error_propagates() {
        let store = seeded_store();
        let iterator = new_iterator(store, &pfs("x", "missing", "c0")).unwrap();
        let err = iterator.iterate(&mut |_| Ok(())).unwrap_err();
        assert!(matches!(err, DatumError::Store(e) if e.is_not_found()));
    }

    #[test]
    fn test_join_and_git_are_unsupported() {
        let store = seeded_store();
        let err = match new_iterator(Arc::clone(&store), &InputSpec::Join(vec![])) {
            Err(e) => e,
            Ok(_) => panic!("expected an error"),
        };
        assert!(matches!(err, DatumError::UnsupportedInput(kind) if kind == "join"));

        let err = match new_iterator(store, &InputSpec::Git(crate::input::GitInput::default())) {
            Err(e) => e,
            Ok(_) => panic!("expected an error"),
        };
        assert!(matches!(err, DatumError::UnsupportedInput(kind) if kind == "git"));
    }
}
