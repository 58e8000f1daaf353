//! The [`GitWorktree`] trait — every git operation that mutates state.
//!
//! Staging is the only mutation the merge engine performs; branch and
//! worktree management is used by the task registry when a task is created
//! or explicitly destroyed.

use std::path::Path;

use crate::error::GitError;

/// Mutating git operations.
pub trait GitWorktree: Send + Sync {
    /// Stage the current working-tree content of `path`.
    ///
    /// Replaces: `git add -- <path>`.
    fn stage_path(&self, path: &Path) -> Result<(), GitError>;

    /// Stage the removal of `path`. No-op if the index has no such entry.
    ///
    /// Replaces: `git rm --cached --ignore-unmatch --quiet -- <path>`.
    fn stage_removal(&self, path: &Path) -> Result<(), GitError>;

    /// Create a local branch at `start_point`. Fails if it already exists.
    ///
    /// Replaces: `git branch <name> <start_point>`.
    fn create_branch(&self, name: &str, start_point: &str) -> Result<(), GitError>;

    /// Force-delete a local branch.
    ///
    /// Replaces: `git branch -D <name>`.
    fn delete_branch(&self, name: &str) -> Result<(), GitError>;

    /// Check out an existing branch into a new linked worktree.
    ///
    /// Replaces: `git worktree add <path> <branch>`.
    fn add_worktree(&self, path: &Path, branch: &str) -> Result<(), GitError>;

    /// Remove a linked worktree, discarding local modifications.
    ///
    /// Replaces: `git worktree remove --force <path>`.
    fn remove_worktree(&self, path: &Path) -> Result<(), GitError>;
}
