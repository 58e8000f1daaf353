//! The [`GitQuery`] trait — the read-only boundary between taskmerge and git.
//!
//! Every method here is free of side effects on the working tree, the index,
//! and refs. Anything that mutates lives on [`GitWorktree`](crate::GitWorktree).
//!
//! | Method                   | Replaces                                          |
//! |--------------------------|---------------------------------------------------|
//! | `current_branch`         | `git symbolic-ref --short HEAD`                   |
//! | `rev_parse[_opt]`        | `git rev-parse --verify <spec>^{commit}`          |
//! | `merge_base`             | `git merge-base <a> <b>`                          |
//! | `changed_files`          | `git diff --name-status <base>...<head>`          |
//! | `content_at`             | `git show <rev>:<path>`                           |
//! | `detect_renames`         | `git log --name-status -M --diff-filter=R`        |
//! | `dry_run_conflict_check` | `git merge-tree --write-tree <base> <task>`       |
//! | `merge_file`             | `git merge-file -p <ours> <base> <theirs>`        |
//! | `list_branches`          | `git for-each-ref refs/heads/<prefix>`            |

use std::path::{Path, PathBuf};

use crate::error::GitError;
use crate::types::{ConflictCheck, DiffEntry, GitOid, RenamePair};

/// Side-effect-free git queries.
///
/// Implementations must be shareable across the merge worker pool, hence the
/// `Send + Sync` bound. The trait is object-safe.
pub trait GitQuery: Send + Sync {
    /// The repository working-tree root all relative paths are resolved against.
    fn root(&self) -> &Path;

    /// The common git directory, shared by every linked worktree.
    fn common_dir(&self) -> Result<PathBuf, GitError>;

    /// The short name of the checked-out branch, or `None` for a detached HEAD.
    fn current_branch(&self) -> Result<Option<String>, GitError>;

    /// Resolve a revision to a commit OID.
    ///
    /// Returns [`GitError::NotFound`] if the spec does not name a commit.
    fn rev_parse(&self, spec: &str) -> Result<GitOid, GitError>;

    /// Like [`rev_parse`](Self::rev_parse) but `None` when the spec cannot be
    /// resolved.
    fn rev_parse_opt(&self, spec: &str) -> Result<Option<GitOid>, GitError>;

    /// Best common ancestor of two revisions, or `None` if the histories are
    /// unrelated.
    fn merge_base(&self, a: &str, b: &str) -> Result<Option<GitOid>, GitError>;

    /// Files changed on `head` since it diverged from `base`.
    ///
    /// Symmetric-difference aware: only changes reachable from `head` but not
    /// from `base` are reported. Sorted by path.
    fn changed_files(&self, base: &str, head: &str) -> Result<Vec<DiffEntry>, GitError>;

    /// File content at a revision. `None` when the path does not exist there
    /// (or names a directory or submodule).
    fn content_at(&self, rev: &str, path: &Path) -> Result<Option<Vec<u8>>, GitError>;

    /// Renames committed in `from..to`, oldest first.
    fn detect_renames(&self, from: &str, to: &str) -> Result<Vec<RenamePair>, GitError>;

    /// Would merging `task` into `base` conflict?
    ///
    /// Must never write to the working directory or the index.
    fn dry_run_conflict_check(&self, base: &str, task: &str) -> Result<ConflictCheck, GitError>;

    /// Deterministic three-way text merge.
    ///
    /// Returns `Some(merged)` for a clean merge and `None` when the two sides
    /// made overlapping edits. An absent ancestor is passed as an empty slice.
    fn merge_file(
        &self,
        base: &[u8],
        ours: &[u8],
        theirs: &[u8],
    ) -> Result<Option<Vec<u8>>, GitError>;

    /// Local branch names starting with `prefix` (e.g. `"task/"`), sorted.
    fn list_branches(&self, prefix: &str) -> Result<Vec<String>, GitError>;
}
