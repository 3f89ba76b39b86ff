//! In-memory mirrors of materialized content.
//!
//! Trees serve two purposes in the core: [`OrderedTree`] records the metadata
//! of everything a pull touched (the stats mirror handed back to the
//! scheduler), and the [`HashTree`] trait is the walkable source/sink used by
//! diff materialization and tree pulls. [`MemTree`] is the sorted in-memory
//! implementation.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::pathutil::{normalize, rel_path};
use crate::store::{BlockRef, ObjectRef};

/// Content metadata for a file node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileData {
    /// Content hash of the whole file
    pub hash: String,
    /// Objects making up the content, in order
    pub objects: Vec<ObjectRef>,
    /// Block references resolved for the content
    pub block_refs: Vec<BlockRef>,
}

/// One node of a tree; `file == None` marks a directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeNode {
    /// File size, or total descendant size for directories
    pub size_bytes: u64,
    /// File metadata; absent for directories
    pub file: Option<FileData>,
}

impl TreeNode {
    /// Returns true if this node is a directory.
    pub fn is_dir(&self) -> bool {
        self.file.is_none()
    }
}

/// Errors from tree operations.
#[derive(Debug, Error)]
pub enum TreeError {
    /// The path is not a legal tree path
    #[error("invalid tree path {0:?}")]
    InvalidPath(String),

    /// A caller-supplied callback aborted the walk.
    ///
    /// Same stash-and-signal convention as `StoreError::Aborted`; it should
    /// never escape to end users.
    #[error("tree walk aborted by caller")]
    Aborted,
}

/// Callback invoked once per node during a walk.
pub type NodeCallback<'a> = dyn FnMut(&str, &TreeNode) -> Result<(), TreeError> + 'a;

/// A walkable, appendable tree of file nodes.
pub trait HashTree: Send {
    /// Records a file at `path` made of `objects`.
    fn put_file(
        &mut self,
        path: &str,
        objects: &[ObjectRef],
        size_bytes: u64,
    ) -> Result<(), TreeError>;

    /// Walks the subtree rooted at `root`, invoking `cb` once per node.
    fn walk(&self, root: &str, cb: &mut NodeCallback<'_>) -> Result<(), TreeError>;
}

/// Insertion-ordered mirror used for stats accounting.
///
/// Nodes are kept in the order they were recorded, which for a pull is the
/// walk order of the source commit.
#[derive(Debug, Default)]
pub struct OrderedTree {
    nodes: Vec<(String, TreeNode)>,
}

impl OrderedTree {
    /// Creates an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a directory node.
    pub fn put_dir(&mut self, path: &str) {
        self.nodes.push((
            normalize(path),
            TreeNode {
                size_bytes: 0,
                file: None,
            },
        ));
    }

    /// Records a file node with its content hash and block references.
    pub fn put_file(&mut self, path: &str, hash: &str, size_bytes: u64, block_refs: Vec<BlockRef>) {
        self.nodes.push((
            normalize(path),
            TreeNode {
                size_bytes,
                file: Some(FileData {
                    hash: hash.to_string(),
                    objects: vec![],
                    block_refs,
                }),
            },
        ));
    }

    /// The recorded nodes, in insertion order.
    pub fn nodes(&self) -> &[(String, TreeNode)] {
        &self.nodes
    }

    /// The first node recorded at `path`, if any.
    pub fn get(&self, path: &str) -> Option<&TreeNode> {
        let path = normalize(path);
        self.nodes.iter().find(|(p, _)| *p == path).map(|(_, n)| n)
    }

    /// Number of recorded nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Sorted in-memory [`HashTree`].
#[derive(Debug, Default)]
pub struct MemTree {
    files: BTreeMap<String, TreeNode>,
}

impl MemTree {
    /// Creates an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// The file node at `path`, if any.
    pub fn get(&self, path: &str) -> Option<&TreeNode> {
        self.files.get(&normalize(path))
    }

    /// Number of file nodes.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Returns true if the tree holds no files.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl HashTree for MemTree {
    fn put_file(
        &mut self,
        path: &str,
        objects: &[ObjectRef],
        size_bytes: u64,
    ) -> Result<(), TreeError> {
        if path.is_empty() {
            return Err(TreeError::InvalidPath(path.to_string()));
        }
        self.files.insert(
            normalize(path),
            TreeNode {
                size_bytes,
                file: Some(FileData {
                    hash: String::new(),
                    objects: objects.to_vec(),
                    block_refs: vec![],
                }),
            },
        );
        Ok(())
    }

    fn walk(&self, root: &str, cb: &mut NodeCallback<'_>) -> Result<(), TreeError> {
        let root = normalize(root);
        for (path, node) in &self.files {
            if rel_path(&root, path).is_none() {
                continue;
            }
            cb(path, node)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordered_tree_preserves_insertion_order() {
        let mut tree = OrderedTree::new();
        tree.put_dir("/b");
        tree.put_file("/b/file", "h1", 3, vec![]);
        tree.put_dir("/a");

        let paths: Vec<_> = tree.nodes().iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(paths, vec!["/b", "/b/file", "/a"]);
        assert!(tree.get("/b").unwrap().is_dir());
        assert_eq!(tree.get("/b/file").unwrap().size_bytes, 3);
    }

    #[test]
    fn test_mem_tree_walk_is_sorted_and_scoped() {
        let mut tree = MemTree::new();
        tree.put_file("/b", &[ObjectRef::new("h2")], 2).unwrap();
        tree.put_file("/a/x", &[ObjectRef::new("h1")], 1).unwrap();
        tree.put_file("/a/y", &[ObjectRef::new("h3")], 3).unwrap();

        let mut all = Vec::new();
        tree.walk("/", &mut |path, _| {
            all.push(path.to_string());
            Ok(())
        })
        .unwrap();
        assert_eq!(all, vec!["/a/x", "/a/y", "/b"]);

        let mut scoped = Vec::new();
        tree.walk("/a", &mut |path, _| {
            scoped.push(path.to_string());
            Ok(())
        })
        .unwrap();
        assert_eq!(scoped, vec!["/a/x", "/a/y"]);
    }

    #[test]
    fn test_mem_tree_walk_abort_propagates() {
        let mut tree = MemTree::new();
        tree.put_file("/a", &[], 0).unwrap();
        tree.put_file("/b", &[], 0).unwrap();

        let mut seen = 0;
        let err = tree
            .walk("/", &mut |_, _| {
                seen += 1;
                Err(TreeError::Aborted)
            })
            .unwrap_err();
        assert!(matches!(err, TreeError::Aborted));
        assert_eq!(seen, 1);
    }
}
