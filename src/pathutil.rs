//! Helpers for `/`-separated commit paths and scratch-root joining.
//!
//! Commit paths are plain strings rooted at `/`; they are not OS paths. The
//! only OS-path operation the core needs is anchoring a relative commit path
//! under a caller-supplied scratch root.

use std::path::{Path, PathBuf};

/// Computes `path` relative to `base`.
///
/// Returns `"."` when the two are equal and `None` when `path` is not under
/// `base`.
pub(crate) fn rel_path(base: &str, path: &str) -> Option<String> {
    let base = base.trim_end_matches('/');
    let path = path.trim_end_matches('/');
    if path == base {
        return Some(".".to_string());
    }
    if base.is_empty() || base == "." {
        return Some(path.trim_start_matches('/').to_string());
    }
    path.strip_prefix(base)
        .and_then(|rest| rest.strip_prefix('/'))
        .map(|rest| rest.to_string())
}

/// Joins a relative commit path onto `base`, collapsing `"."`.
pub(crate) fn path_join(base: &str, rel: &str) -> String {
    let base = base.trim_end_matches('/');
    if rel == "." || rel.is_empty() {
        return if base.is_empty() {
            "/".to_string()
        } else {
            base.to_string()
        };
    }
    format!("{}/{}", base, rel.trim_start_matches('/'))
}

/// Normalizes a commit path to a `/`-rooted form without a trailing slash.
pub(crate) fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return "/".to_string();
    }
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// Anchors a relative commit path under an OS scratch root.
///
/// A `"."` relative path addresses the root itself (a single-file pull
/// materializes directly at the scratch root).
pub(crate) fn scratch_path(root: &Path, rel: &str) -> PathBuf {
    if rel == "." || rel.is_empty() {
        root.to_path_buf()
    } else {
        root.join(rel)
    }
}
