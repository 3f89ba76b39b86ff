//! In-memory content store.
//!
//! Backs the test suite and local development. Content is held per
//! `(repo, commit)` as a sorted path map; files are split into fixed-size
//! chunks whose hashes form the object list, the way the production store
//! addresses content. Directory entries are synthesized from file paths.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::{Cursor, Read, Write};
use std::sync::Mutex;

use crate::glob::CompiledGlob;
use crate::pathutil::{normalize, path_join, rel_path};

use super::client::{ContentStore, FileInfoCallback, ObjectStore};
use super::types::{
    hash_chunk, BlockRef, FileInfo, FileRef, FileType, ObjectInfo, ObjectRef, StoreError,
    CHUNK_SIZE,
};

/// In-memory [`ContentStore`] implementation.
pub struct MemStore {
    chunk_size: u64,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    /// `(repo, commit)` -> path -> content
    commits: HashMap<(String, String), BTreeMap<String, Vec<u8>>>,
    /// Object hash -> chunk bytes
    objects: HashMap<String, Vec<u8>>,
}

impl MemStore {
    /// Creates an empty store using the production chunk size.
    pub fn new() -> Self {
        Self::with_chunk_size(CHUNK_SIZE)
    }

    /// Creates an empty store with a custom chunk size.
    ///
    /// Small chunk sizes keep resume tests readable.
    pub fn with_chunk_size(chunk_size: u64) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            state: Mutex::new(State::default()),
        }
    }

    /// Seeds `(repo, commit, path)` with `content`, replacing any previous
    /// content at that path.
    pub fn put(&self, repo: &str, commit: &str, path: &str, content: &[u8]) {
        let mut state = self.state.lock().unwrap();
        self.index_chunks(&mut state, content);
        state
            .commits
            .entry((repo.to_string(), commit.to_string()))
            .or_default()
            .insert(normalize(path), content.to_vec());
    }

    /// Returns the content at `(repo, commit, path)`, if any.
    pub fn content(&self, repo: &str, commit: &str, path: &str) -> Option<Vec<u8>> {
        let state = self.state.lock().unwrap();
        state
            .commits
            .get(&(repo.to_string(), commit.to_string()))
            .and_then(|tree| tree.get(&normalize(path)))
            .cloned()
    }

    /// Splits `content` into chunks and records their objects.
    fn index_chunks(&self, state: &mut State, content: &[u8]) {
        for chunk in chunks(content, self.chunk_size) {
            state.objects.insert(hash_chunk(chunk), chunk.to_vec());
        }
    }

    /// All node paths (files plus synthesized directories) of a commit,
    /// sorted.
    fn node_paths(tree: &BTreeMap<String, Vec<u8>>) -> BTreeSet<String> {
        let mut nodes = BTreeSet::new();
        nodes.insert("/".to_string());
        for path in tree.keys() {
            nodes.insert(path.clone());
            let mut dir = path.as_str();
            while let Some(idx) = dir.rfind('/') {
                dir = &dir[..idx];
                if dir.is_empty() {
                    break;
                }
                nodes.insert(dir.to_string());
            }
        }
        nodes
    }

    /// Builds the [`FileInfo`] for one node of a commit.
    fn node_info(
        &self,
        repo: &str,
        commit: &str,
        tree: &BTreeMap<String, Vec<u8>>,
        path: &str,
    ) -> FileInfo {
        if let Some(content) = tree.get(path) {
            let objects = chunks(content, self.chunk_size)
                .map(|chunk| ObjectRef::new(hash_chunk(chunk)))
                .collect();
            return FileInfo {
                file: FileRef::new(repo, commit, path),
                file_type: FileType::File,
                size_bytes: content.len() as u64,
                hash: hash_chunk(content),
                objects,
                block_refs: vec![],
            };
        }
        // Directory: size is the total size of descendants.
        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{path}/")
        };
        let size: u64 = tree
            .iter()
            .filter(|(p, _)| p.starts_with(&prefix))
            .map(|(_, content)| content.len() as u64)
            .sum();
        FileInfo {
            file: FileRef::new(repo, commit, path),
            file_type: FileType::Dir,
            size_bytes: size,
            hash: String::new(),
            objects: vec![],
            block_refs: vec![],
        }
    }

    /// Snapshot of the file infos in a subtree, root first, parents before
    /// children.
    fn snapshot(
        &self,
        repo: &str,
        commit: &str,
        root: &str,
        only_matching: Option<&CompiledGlob>,
    ) -> Result<Vec<FileInfo>, StoreError> {
        let state = self.state.lock().unwrap();
        let tree = state
            .commits
            .get(&(repo.to_string(), commit.to_string()))
            .ok_or_else(|| StoreError::not_found(repo, commit, root))?;
        let root = normalize(root);
        let mut infos = Vec::new();
        for path in Self::node_paths(tree) {
            if rel_path(&root, &path).is_none() {
                continue;
            }
            if let Some(glob) = only_matching {
                // The root is not a glob candidate: a bare wildcard names the
                // top-level entries, not the commit itself.
                if path == "/" && glob.pattern() != "/" {
                    continue;
                }
                if !glob.is_match(&path) {
                    continue;
                }
            }
            infos.push(self.node_info(repo, commit, tree, &path));
        }
        Ok(infos)
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentStore for MemStore {
    fn glob_file(
        &self,
        repo: &str,
        commit: &str,
        pattern: &str,
        cb: &mut FileInfoCallback<'_>,
    ) -> Result<(), StoreError> {
        let glob = CompiledGlob::compile(pattern)?;
        // Snapshot first: callbacks may re-enter the store.
        let infos = self.snapshot(repo, commit, "/", Some(&glob))?;
        for info in &infos {
            cb(info)?;
        }
        Ok(())
    }

    fn walk(
        &self,
        repo: &str,
        commit: &str,
        path: &str,
        cb: &mut FileInfoCallback<'_>,
    ) -> Result<(), StoreError> {
        let infos = self.snapshot(repo, commit, path, None)?;
        if infos.is_empty() {
            return Err(StoreError::not_found(repo, commit, path));
        }
        for info in &infos {
            cb(info)?;
        }
        Ok(())
    }

    fn get_file(
        &self,
        repo: &str,
        commit: &str,
        path: &str,
        offset: u64,
        size: u64,
        w: &mut dyn Write,
    ) -> Result<(), StoreError> {
        let content = self
            .content(repo, commit, path)
            .ok_or_else(|| StoreError::not_found(repo, commit, path))?;
        w.write_all(window(&content, offset, size))?;
        Ok(())
    }

    fn get_objects(
        &self,
        hashes: &[String],
        offset: u64,
        size: u64,
        _total_size: u64,
        w: &mut dyn Write,
    ) -> Result<(), StoreError> {
        let mut content = Vec::new();
        {
            let state = self.state.lock().unwrap();
            for hash in hashes {
                let chunk = state.objects.get(hash).ok_or_else(|| StoreError::NotFound {
                    what: format!("object {hash}"),
                })?;
                content.extend_from_slice(chunk);
            }
        }
        w.write_all(window(&content, offset, size))?;
        Ok(())
    }

    fn inspect_object(&self, hash: &str) -> Result<ObjectInfo, StoreError> {
        let state = self.state.lock().unwrap();
        let chunk = state.objects.get(hash).ok_or_else(|| StoreError::NotFound {
            what: format!("object {hash}"),
        })?;
        Ok(ObjectInfo {
            block_ref: BlockRef {
                hash: hash.to_string(),
                lower: 0,
                upper: chunk.len() as u64,
            },
        })
    }

    fn inspect_file(&self, repo: &str, commit: &str, path: &str) -> Result<FileInfo, StoreError> {
        let state = self.state.lock().unwrap();
        let tree = state
            .commits
            .get(&(repo.to_string(), commit.to_string()))
            .ok_or_else(|| StoreError::not_found(repo, commit, path))?;
        let path = normalize(path);
        if !tree.contains_key(&path) {
            return Err(StoreError::not_found(repo, commit, &path));
        }
        Ok(self.node_info(repo, commit, tree, &path))
    }

    fn diff_file(
        &self,
        new: &FileRef,
        old: &FileRef,
    ) -> Result<(Vec<FileInfo>, Vec<FileInfo>), StoreError> {
        let state = self.state.lock().unwrap();
        let new_tree = state
            .commits
            .get(&(new.repo.clone(), new.commit.clone()))
            .ok_or_else(|| StoreError::not_found(&new.repo, &new.commit, &new.path))?;
        let old_tree = state
            .commits
            .get(&(old.repo.clone(), old.commit.clone()))
            .ok_or_else(|| StoreError::not_found(&old.repo, &old.commit, &old.path))?;

        let new_root = normalize(&new.path);
        let old_root = normalize(&old.path);
        let new_files: BTreeMap<String, &Vec<u8>> = new_tree
            .iter()
            .filter_map(|(p, c)| rel_path(&new_root, p).map(|rel| (rel, c)))
            .collect();
        let old_files: BTreeMap<String, &Vec<u8>> = old_tree
            .iter()
            .filter_map(|(p, c)| rel_path(&old_root, p).map(|rel| (rel, c)))
            .collect();

        let mut news = Vec::new();
        for (rel, content) in &new_files {
            if old_files.get(rel).copied() != Some(*content) {
                let path = path_join(&new_root, rel);
                news.push(self.node_info(&new.repo, &new.commit, new_tree, &path));
            }
        }
        let mut olds = Vec::new();
        for (rel, content) in &old_files {
            if new_files.get(rel).copied() != Some(*content) {
                let path = path_join(&old_root, rel);
                olds.push(self.node_info(&old.repo, &old.commit, old_tree, &path));
            }
        }
        Ok((news, olds))
    }

    fn put_file(
        &self,
        repo: &str,
        commit: &str,
        path: &str,
        r: &mut dyn Read,
    ) -> Result<u64, StoreError> {
        let mut content = Vec::new();
        let n = r.read_to_end(&mut content)?;
        let mut state = self.state.lock().unwrap();
        let entry = state
            .commits
            .entry((repo.to_string(), commit.to_string()))
            .or_default()
            .entry(normalize(path))
            .or_default();
        entry.extend_from_slice(&content);
        let merged = entry.clone();
        self.index_chunks(&mut state, &merged);
        Ok(n as u64)
    }

    fn put_file_overwrite(
        &self,
        repo: &str,
        commit: &str,
        path: &str,
        r: &mut dyn Read,
        offset: u64,
    ) -> Result<u64, StoreError> {
        let mut content = Vec::new();
        let n = r.read_to_end(&mut content)?;
        let mut state = self.state.lock().unwrap();
        let entry = state
            .commits
            .entry((repo.to_string(), commit.to_string()))
            .or_default()
            .entry(normalize(path))
            .or_default();
        entry.truncate(offset as usize);
        entry.extend_from_slice(&content);
        let merged = entry.clone();
        self.index_chunks(&mut state, &merged);
        Ok(n as u64)
    }

    fn delete_file(&self, repo: &str, commit: &str, path: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        // Deleting from a commit that has no content yet is a no-op.
        if let Some(tree) = state
            .commits
            .get_mut(&(repo.to_string(), commit.to_string()))
        {
            let path = normalize(path);
            tree.retain(|p, _| rel_path(&path, p).is_none());
        }
        Ok(())
    }

    fn get_tar(
        &self,
        repo: &str,
        commit: &str,
        pattern: &str,
    ) -> Result<Box<dyn Read + Send>, StoreError> {
        let glob = CompiledGlob::compile(pattern)?;
        let mut builder = tar::Builder::new(Vec::new());
        {
            let state = self.state.lock().unwrap();
            let tree = state
                .commits
                .get(&(repo.to_string(), commit.to_string()))
                .ok_or_else(|| StoreError::not_found(repo, commit, pattern))?;
            for (path, content) in tree.iter() {
                if !glob.is_match(path) {
                    continue;
                }
                let mut header = tar::Header::new_gnu();
                header.set_size(content.len() as u64);
                header.set_mode(0o644);
                header.set_cksum();
                builder
                    .append_data(&mut header, path.trim_start_matches('/'), content.as_slice())
                    .map_err(StoreError::Io)?;
            }
        }
        let archive = builder.into_inner().map_err(StoreError::Io)?;
        Ok(Box::new(Cursor::new(archive)))
    }
}

/// Blob store writing into a shared path -> bytes map.
///
/// The in-memory counterpart of [`ObjectStore`] used by tests. Clones share
/// the same underlying map.
#[derive(Clone, Default)]
pub struct MemObjectStore {
    blobs: std::sync::Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemObjectStore {
    /// Creates an empty blob store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the blob at `path`, if any.
    pub fn blob(&self, path: &str) -> Option<Vec<u8>> {
        self.blobs.lock().unwrap().get(path).cloned()
    }

    /// Number of blobs written.
    pub fn len(&self) -> usize {
        self.blobs.lock().unwrap().len()
    }

    /// Returns true if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.blobs.lock().unwrap().is_empty()
    }
}

struct MemBlobWriter {
    path: String,
    buf: Vec<u8>,
    sink: MemObjectStore,
}

impl Write for MemBlobWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.sink
            .blobs
            .lock()
            .unwrap()
            .insert(self.path.clone(), self.buf.clone());
        Ok(())
    }
}

impl Drop for MemBlobWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

impl ObjectStore for MemObjectStore {
    fn writer(&self, path: &str) -> Result<Box<dyn Write + Send>, StoreError> {
        Ok(Box::new(MemBlobWriter {
            path: path.to_string(),
            buf: Vec::new(),
            sink: self.clone(),
        }))
    }
}

/// Iterates `content` in `chunk_size` pieces; empty content yields nothing.
fn chunks(content: &[u8], chunk_size: u64) -> impl Iterator<Item = &[u8]> {
    content.chunks(chunk_size as usize)
}

/// Applies the `(offset, size)` window convention: `size == 0` means "to the
/// end".
fn window(content: &[u8], offset: u64, size: u64) -> &[u8] {
    let start = (offset as usize).min(content.len());
    let end = if size == 0 {
        content.len()
    } else {
        (start + size as usize).min(content.len())
    };
    &content[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> MemStore {
        let store = MemStore::with_chunk_size(4);
        store.put("images", "c1", "/a.txt", b"aaaa");
        store.put("images", "c1", "/dir/b.txt", b"bbbbbbbb");
        store.put("images", "c1", "/dir/sub/c.txt", b"cc");
        store
    }

    #[test]
    fn test_walk_yields_parents_first() {
        let store = seeded();
        let mut paths = Vec::new();
        store
            .walk("images", "c1", "/", &mut |fi| {
                paths.push(fi.file.path.clone());
                Ok(())
            })
            .unwrap();
        assert_eq!(
            paths,
            vec!["/", "/a.txt", "/dir", "/dir/b.txt", "/dir/sub", "/dir/sub/c.txt"]
        );
    }

    #[test]
    fn test_walk_subtree() {
        let store = seeded();
        let mut paths = Vec::new();
        store
            .walk("images", "c1", "/dir", &mut |fi| {
                paths.push(fi.file.path.clone());
                Ok(())
            })
            .unwrap();
        assert_eq!(paths, vec!["/dir", "/dir/b.txt", "/dir/sub", "/dir/sub/c.txt"]);
    }

    #[test]
    fn test_dir_sizes_aggregate_descendants() {
        let store = seeded();
        let mut dir_size = 0;
        store
            .walk("images", "c1", "/dir", &mut |fi| {
                if fi.file.path == "/dir" {
                    assert!(fi.is_dir());
                    dir_size = fi.size_bytes;
                }
                Ok(())
            })
            .unwrap();
        assert_eq!(dir_size, 10);
    }

    #[test]
    fn test_glob_matches_files_and_dirs() {
        let store = seeded();
        let mut paths = Vec::new();
        store
            .glob_file("images", "c1", "/*", &mut |fi| {
                paths.push(fi.file.path.clone());
                Ok(())
            })
            .unwrap();
        assert_eq!(paths, vec!["/a.txt", "/dir"]);
    }

    #[test]
    fn test_get_file_windows() {
        let store = seeded();
        let mut buf = Vec::new();
        store
            .get_file("images", "c1", "/dir/b.txt", 2, 3, &mut buf)
            .unwrap();
        assert_eq!(buf, b"bbb");

        buf.clear();
        store
            .get_file("images", "c1", "/dir/b.txt", 0, 0, &mut buf)
            .unwrap();
        assert_eq!(buf.len(), 8);
    }

    #[test]
    fn test_objects_round_trip() {
        let store = seeded();
        let info = store.inspect_file("images", "c1", "/dir/b.txt").unwrap();
        assert_eq!(info.objects.len(), 2); // 8 bytes at chunk size 4

        let hashes: Vec<String> = info.objects.iter().map(|o| o.hash.clone()).collect();
        let mut buf = Vec::new();
        store
            .get_objects(&hashes, 0, 0, info.size_bytes, &mut buf)
            .unwrap();
        assert_eq!(buf, b"bbbbbbbb");

        let obj = store.inspect_object(&hashes[0]).unwrap();
        assert_eq!(obj.block_ref.upper, 4);
    }

    #[test]
    fn test_inspect_missing_file_is_not_found() {
        let store = seeded();
        let err = store.inspect_file("images", "c1", "/nope").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_diff_file() {
        let store = MemStore::with_chunk_size(4);
        store.put("out", "old", "/kept.txt", b"same");
        store.put("out", "old", "/gone.txt", b"old");
        store.put("out", "new", "/kept.txt", b"same");
        store.put("out", "new", "/added.txt", b"new");

        let (news, olds) = store
            .diff_file(
                &FileRef::new("out", "new", "/"),
                &FileRef::new("out", "old", "/"),
            )
            .unwrap();
        let new_paths: Vec<_> = news.iter().map(|fi| fi.file.path.as_str()).collect();
        let old_paths: Vec<_> = olds.iter().map(|fi| fi.file.path.as_str()).collect();
        assert_eq!(new_paths, vec!["/added.txt"]);
        assert_eq!(old_paths, vec!["/gone.txt"]);
    }

    #[test]
    fn test_put_file_overwrite_keeps_prefix() {
        let store = MemStore::with_chunk_size(4);
        store.put("out", "c1", "/f", b"aaaabbbb");
        store
            .put_file_overwrite("out", "c1", "/f", &mut &b"XXXX"[..], 4)
            .unwrap();
        assert_eq!(store.content("out", "c1", "/f").unwrap(), b"aaaaXXXX");
    }

    #[test]
    fn test_delete_file() {
        let store = seeded();
        store.delete_file("images", "c1", "/dir").unwrap();
        assert!(store.content("images", "c1", "/dir/b.txt").is_none());
        assert!(store.content("images", "c1", "/a.txt").is_some());
    }

    #[test]
    fn test_get_tar_streams_matching_files() {
        let store = seeded();
        let reader = store.get_tar("images", "c1", "/dir/*.txt").unwrap();
        let mut archive = tar::Archive::new(reader);
        let mut names = Vec::new();
        for entry in archive.entries().unwrap() {
            let entry = entry.unwrap();
            names.push(entry.path().unwrap().to_string_lossy().into_owned());
        }
        assert_eq!(names, vec!["dir/b.txt"]);
    }
}
