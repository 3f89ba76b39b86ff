//! Input source descriptions.
//!
//! An [`InputSpec`] is the compositional description of where a pipeline's
//! datums come from: leaves name a `(repo, commit)` plus a glob, and the
//! `Union`/`Cross` operators combine child specs. The tree is data only;
//! enumeration lives in [`crate::datum`].

use serde::{Deserialize, Serialize};

/// A tagged description of an input source.
///
/// `Join` and `Git` are part of the schema so persisted specs decode, but
/// iterator construction rejects them with a configuration error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InputSpec {
    /// Files matched by a glob within one commit
    Pfs(PfsInput),
    /// A cron trigger's tick commit
    Cron(CronInput),
    /// Concatenation of the children's datums, in declaration order
    Union(Vec<InputSpec>),
    /// Cartesian product of the children's datums
    Cross(Vec<InputSpec>),
    /// Join on derived keys (not implemented)
    Join(Vec<InputSpec>),
    /// A git repository snapshot (not implemented)
    Git(GitInput),
}

impl InputSpec {
    /// The input kind, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            InputSpec::Pfs(_) => "pfs",
            InputSpec::Cron(_) => "cron",
            InputSpec::Union(_) => "union",
            InputSpec::Cross(_) => "cross",
            InputSpec::Join(_) => "join",
            InputSpec::Git(_) => "git",
        }
    }
}

/// A leaf input: files matched by a glob within `(repo, commit)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PfsInput {
    /// Name the entries carry downstream (usually the mount name)
    pub name: String,
    /// Repository to read from
    pub repo: String,
    /// Branch the commit belongs to
    pub branch: String,
    /// Commit to read; empty means "no input yet" and yields nothing
    pub commit: String,
    /// Glob selecting the files that become datums
    pub glob: String,
    /// Template deriving the join key from each match (`$1`, `$2`, ...)
    pub join_on: String,
    /// Materialize matched files as named pipes instead of copies
    pub lazy: bool,
    /// Materialize matched files as empty placeholders
    pub empty_files: bool,
    /// Expose the input through the S3 gateway instead of the filesystem
    pub s3: bool,
}

impl PfsInput {
    /// Creates an input reading `repo` with the given glob.
    pub fn new(name: impl Into<String>, repo: impl Into<String>, glob: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            repo: repo.into(),
            glob: glob.into(),
            ..Self::default()
        }
    }

    /// Sets the branch.
    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }

    /// Sets the commit.
    pub fn with_commit(mut self, commit: impl Into<String>) -> Self {
        self.commit = commit.into();
        self
    }

    /// Sets the join key template.
    pub fn with_join_on(mut self, join_on: impl Into<String>) -> Self {
        self.join_on = join_on.into();
        self
    }

    /// Requests lazy (named pipe) materialization.
    pub fn lazy(mut self) -> Self {
        self.lazy = true;
        self
    }

    /// Requests empty placeholder materialization.
    pub fn empty_files(mut self) -> Self {
        self.empty_files = true;
        self
    }
}

/// A cron input: the commit produced by the trigger's tick.
///
/// Desugars to a [`PfsInput`] over `branch: "master", glob: "/*"`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CronInput {
    /// Name the entries carry downstream
    pub name: String,
    /// Repository the trigger writes ticks into
    pub repo: String,
    /// Tick commit to read; empty yields nothing
    pub commit: String,
}

impl CronInput {
    /// Creates a cron input.
    pub fn new(name: impl Into<String>, repo: impl Into<String>, commit: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            repo: repo.into(),
            commit: commit.into(),
        }
    }

    /// The equivalent leaf input.
    pub fn desugar(&self) -> PfsInput {
        PfsInput {
            name: self.name.clone(),
            repo: self.repo.clone(),
            branch: "master".to_string(),
            commit: self.commit.clone(),
            glob: "/*".to_string(),
            ..PfsInput::default()
        }
    }
}

/// A git input (schema only; not implemented).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GitInput {
    /// Name the entries carry downstream
    pub name: String,
    /// Clone URL
    pub url: String,
    /// Branch to track
    pub branch: String,
    /// Commit to read
    pub commit: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cron_desugars_to_master_star() {
        let cron = CronInput::new("tick", "cron-repo", "c9");
        let pfs = cron.desugar();
        assert_eq!(pfs.name, "tick");
        assert_eq!(pfs.repo, "cron-repo");
        assert_eq!(pfs.branch, "master");
        assert_eq!(pfs.commit, "c9");
        assert_eq!(pfs.glob, "/*");
        assert!(!pfs.lazy);
    }

    #[test]
    fn test_spec_round_trips_as_json() {
        let spec = InputSpec::Cross(vec![
            InputSpec::Pfs(PfsInput::new("a", "images", "/*").with_commit("c1")),
            InputSpec::Union(vec![InputSpec::Cron(CronInput::new("t", "ticks", "c2"))]),
        ]);
        let json = serde_json::to_string(&spec).unwrap();
        let back: InputSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back, spec);
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(InputSpec::Union(vec![]).kind(), "union");
        assert_eq!(InputSpec::Git(GitInput::default()).kind(), "git");
    }
}
