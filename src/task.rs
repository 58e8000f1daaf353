//! Tasks: named units of isolated work, each on branch `task/<name>` with a
//! worktree under the configured worktree directory.
//!
//! New tasks are numbered `NNN-<slug>`. Numbering scans every existing task
//! branch and every worktree directory entry (a worktree may exist before
//! its first commit lands anywhere visible) under a global lock, so two
//! concurrent `create` calls never pick the same ordinal.
//!
//! The registry never deletes anything on its own; [`TaskRegistry::destroy`]
//! is an explicit caller action, taken under the task's merge lock so it
//! cannot pull a worktree out from under a running merge.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use taskmerge_git::{GitError, GitQuery, GitWorktree};

use crate::lock::{LockError, LockManager, LockSettings};

/// Prefix of every task branch.
pub const BRANCH_PREFIX: &str = "task/";

/// Name of the global numbering lock.
pub const NUMBERING_LOCK: &str = "task-numbering";

// ---------------------------------------------------------------------------
// TaskName
// ---------------------------------------------------------------------------

/// A validated task name: lowercase letters, digits, and single hyphens,
/// at most 64 characters, not starting or ending with a hyphen.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskName(String);

impl TaskName {
    /// The maximum length of a task name.
    pub const MAX_LEN: usize = 64;

    /// Validate `s`.
    ///
    /// # Errors
    /// Returns the reason the name is unusable.
    pub fn new(s: &str) -> Result<Self, TaskError> {
        let invalid = |reason: &str| TaskError::InvalidName {
            name: s.to_owned(),
            reason: reason.to_owned(),
        };
        if s.is_empty() {
            return Err(invalid("must not be empty"));
        }
        if s.len() > Self::MAX_LEN {
            return Err(invalid("must be at most 64 characters"));
        }
        if s.starts_with('-') || s.ends_with('-') {
            return Err(invalid("must not start or end with a hyphen"));
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(invalid(
                "must contain only lowercase letters (a-z), digits (0-9), and hyphens (-)",
            ));
        }
        if s.contains("--") {
            return Err(invalid("must not contain consecutive hyphens"));
        }
        Ok(Self(s.to_owned()))
    }

    /// The bare name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The task branch, `task/<name>`.
    #[must_use]
    pub fn branch(&self) -> String {
        format!("{BRANCH_PREFIX}{}", self.0)
    }

    /// The per-task merge lock, `task-<name>`.
    #[must_use]
    pub fn lock_name(&self) -> String {
        format!("task-{}", self.0)
    }

    /// The leading `NNN` of an `NNN-slug` name.
    #[must_use]
    pub fn ordinal(&self) -> Option<u32> {
        ordinal_of(&self.0)
    }
}

impl fmt::Display for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn ordinal_of(name: &str) -> Option<u32> {
    let (digits, rest) = name.split_once('-')?;
    if digits.is_empty() || rest.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

// ---------------------------------------------------------------------------
// TaskError
// ---------------------------------------------------------------------------

/// Errors from task management.
#[derive(Debug)]
pub enum TaskError {
    /// Name or slug failed validation.
    InvalidName {
        /// The rejected value.
        name: String,
        /// Why.
        reason: String,
    },
    /// No such task.
    NotFound {
        /// Task name.
        name: String,
    },
    /// Lock acquisition failed.
    Lock(LockError),
    /// A git operation failed.
    Git(GitError),
    /// Filesystem error.
    Io(std::io::Error),
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidName { name, reason } => write!(
                f,
                "invalid task name '{name}': {reason}\n  Examples: fix-login, 003-add-search"
            ),
            Self::NotFound { name } => write!(
                f,
                "task '{name}' not found.\n  To fix: check existing tasks:\n    taskmerge task list"
            ),
            Self::Lock(err) => write!(f, "{err}"),
            Self::Git(err) => write!(f, "{err}"),
            Self::Io(err) => write!(f, "I/O error: {err}"),
        }
    }
}

impl std::error::Error for TaskError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Lock(err) => Some(err),
            Self::Git(err) => Some(err),
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<LockError> for TaskError {
    fn from(err: LockError) -> Self {
        Self::Lock(err)
    }
}

impl From<GitError> for TaskError {
    fn from(err: GitError) -> Self {
        Self::Git(err)
    }
}

impl From<std::io::Error> for TaskError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

// ---------------------------------------------------------------------------
// TaskRegistry
// ---------------------------------------------------------------------------

/// An existing task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskInfo {
    pub name: TaskName,
    pub branch: String,
    /// The task's worktree, if it exists on disk.
    pub worktree: Option<PathBuf>,
}

/// Creates, lists, and destroys tasks.
pub struct TaskRegistry<'a, R> {
    repo: &'a R,
    locks: LockManager,
    numbering: LockSettings,
    task_lock: LockSettings,
    worktree_dir: PathBuf,
}

impl<'a, R: GitQuery + GitWorktree> TaskRegistry<'a, R> {
    /// `worktree_dir` is relative to the repository root unless absolute.
    pub fn new(
        repo: &'a R,
        locks: LockManager,
        numbering: LockSettings,
        task_lock: LockSettings,
        worktree_dir: &Path,
    ) -> Self {
        Self {
            worktree_dir: repo.root().join(worktree_dir),
            repo,
            locks,
            numbering,
            task_lock,
        }
    }

    /// Where a task's worktree lives.
    #[must_use]
    pub fn worktree_path(&self, name: &TaskName) -> PathBuf {
        self.worktree_dir.join(name.as_str())
    }

    /// Create task `NNN-<slug>` branched from `base`, with its worktree.
    ///
    /// # Errors
    /// Invalid slug, numbering lock timeout, or git failure. A branch whose
    /// worktree could not be created is deleted again.
    pub fn create(&self, slug: &str, base: &str) -> Result<TaskInfo, TaskError> {
        // Validate the slug on its own so "1-" style junk is rejected early.
        TaskName::new(slug)?;

        let _guard = self.locks.acquire(NUMBERING_LOCK, &self.numbering)?;

        let next = self.highest_ordinal()?.map_or(1, |n| n + 1);
        let name = TaskName::new(&format!("{next:03}-{slug}"))?;
        let branch = name.branch();
        let worktree = self.worktree_path(&name);

        self.repo.create_branch(&branch, base)?;
        if let Some(parent) = worktree.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if let Err(e) = self.repo.add_worktree(&worktree, &branch) {
            if let Err(cleanup) = self.repo.delete_branch(&branch) {
                warn!(%branch, error = %cleanup, "could not delete branch after failed worktree add");
            }
            return Err(e.into());
        }

        info!(task = %name, %base, worktree = %worktree.display(), "task created");
        Ok(TaskInfo {
            name,
            branch,
            worktree: Some(worktree),
        })
    }

    /// Every task with a branch, sorted by name.
    pub fn list(&self) -> Result<Vec<TaskInfo>, TaskError> {
        let mut tasks = Vec::new();
        for branch in self.repo.list_branches(BRANCH_PREFIX)? {
            let Some(raw) = branch.strip_prefix(BRANCH_PREFIX) else {
                continue;
            };
            // Branches created by hand may not be valid task names.
            let Ok(name) = TaskName::new(raw) else {
                continue;
            };
            let path = self.worktree_path(&name);
            tasks.push(TaskInfo {
                worktree: path.is_dir().then_some(path),
                name,
                branch,
            });
        }
        tasks.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tasks)
    }

    /// Remove a task's worktree and branch.
    ///
    /// # Errors
    /// [`TaskError::NotFound`] if neither exists; lock timeout if the task
    /// is being merged.
    pub fn destroy(&self, name: &TaskName) -> Result<(), TaskError> {
        let _guard = self.locks.acquire(&name.lock_name(), &self.task_lock)?;

        let branch = name.branch();
        let has_branch = self.repo.rev_parse_opt(&branch)?.is_some();
        let worktree = self.worktree_path(name);
        let has_worktree = worktree.is_dir();
        if !has_branch && !has_worktree {
            return Err(TaskError::NotFound {
                name: name.to_string(),
            });
        }

        if has_worktree {
            self.repo.remove_worktree(&worktree)?;
        }
        if has_branch {
            self.repo.delete_branch(&branch)?;
        }
        info!(task = %name, "task destroyed");
        Ok(())
    }

    fn highest_ordinal(&self) -> Result<Option<u32>, TaskError> {
        let from_branches = self
            .repo
            .list_branches(BRANCH_PREFIX)?
            .into_iter()
            .filter_map(|b| b.strip_prefix(BRANCH_PREFIX).and_then(ordinal_of));

        let mut from_dirs = Vec::new();
        match std::fs::read_dir(&self.worktree_dir) {
            Ok(entries) => {
                for entry in entries {
                    let entry = entry?;
                    if let Some(n) = entry.file_name().to_str().and_then(ordinal_of) {
                        from_dirs.push(n);
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        Ok(from_branches.chain(from_dirs).max())
    }
}
