//! Run-level error types for taskmerge.
//!
//! [`MergeError`] covers failures in shared setup: locking, branch checks,
//! and VCS queries whose answers the whole run depends on. Any of these
//! aborts the run before a single file is written (or, for a VCS failure
//! after classification began, before any further file is written).
//!
//! Failures scoped to one file are not errors; they are recorded as
//! [`FailureReason`](crate::merge::FailureReason)s in the
//! [`MergeRun`](crate::merge::MergeRun) and the run carries on.
//!
//! Messages end with a `To fix:` hint where there is an obvious next step.

use std::fmt;
use std::time::Duration;

use taskmerge_git::GitError;

use crate::lock::{LockError, LockMarker};

// ---------------------------------------------------------------------------
// MergeError
// ---------------------------------------------------------------------------

/// Fatal errors from a merge run.
#[derive(Debug)]
pub enum MergeError {
    /// Another run holds the task lock. Nothing was touched; retry later.
    LockUnavailable {
        /// Task name.
        task: String,
        /// How long we waited.
        waited: Duration,
        /// The holder seen on the last attempt.
        holder: Option<LockMarker>,
    },

    /// The lock could not be taken for a reason other than contention.
    Lock(LockError),

    /// The working tree is not on the base branch, so results would be
    /// written to the wrong branch.
    BaseNotCheckedOut {
        /// Requested base branch.
        expected: String,
        /// Checked-out branch (`None` for a detached HEAD).
        actual: Option<String>,
    },

    /// A branch the run needs does not exist.
    BranchNotFound {
        /// Branch name.
        branch: String,
    },

    /// Base and task branch share no history.
    NoCommonAncestor {
        /// Base branch.
        base: String,
        /// Task branch.
        task: String,
    },

    /// A VCS query the run depends on failed.
    VcsQueryFailed {
        /// What the run was doing.
        context: String,
        /// The underlying git error.
        source: GitError,
    },

    /// The task name cannot name a branch or lock.
    InvalidTaskName {
        /// The rejected name.
        name: String,
        /// Why.
        reason: String,
    },
}

impl MergeError {
    /// Wrap a git error with what the run was doing.
    #[must_use]
    pub fn vcs(context: impl Into<String>) -> impl FnOnce(GitError) -> Self {
        let context = context.into();
        move |source| Self::VcsQueryFailed { context, source }
    }

    /// Map a lock error, turning timeouts into [`MergeError::LockUnavailable`].
    #[must_use]
    pub fn from_lock(task: &str, err: LockError) -> Self {
        match err {
            LockError::Timeout { waited, holder, .. } => Self::LockUnavailable {
                task: task.to_owned(),
                waited,
                holder,
            },
            other => Self::Lock(other),
        }
    }
}

impl fmt::Display for MergeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LockUnavailable {
                task,
                waited,
                holder,
            } => {
                write!(
                    f,
                    "task '{task}' is already being merged (waited {:.1}s",
                    waited.as_secs_f64()
                )?;
                if let Some(h) = holder {
                    write!(f, "; held by {h}")?;
                }
                write!(
                    f,
                    ").\n  To fix: wait for the other merge to finish, then retry. Nothing was changed."
                )
            }
            Self::Lock(err) => write!(f, "could not take the merge lock: {err}"),
            Self::BaseNotCheckedOut { expected, actual } => {
                let actual = actual.as_deref().unwrap_or("a detached HEAD");
                write!(
                    f,
                    "the working tree is on {actual}, not '{expected}'.\n  To fix: git checkout {expected}"
                )
            }
            Self::BranchNotFound { branch } => write!(
                f,
                "branch '{branch}' does not exist.\n  To fix: check existing tasks:\n    taskmerge task list"
            ),
            Self::NoCommonAncestor { base, task } => write!(
                f,
                "'{task}' and '{base}' have no common ancestor; there is nothing to merge against."
            ),
            Self::VcsQueryFailed { context, source } => write!(f, "{context}: {source}"),
            Self::InvalidTaskName { name, reason } => {
                write!(f, "invalid task name '{name}': {reason}")
            }
        }
    }
}

impl std::error::Error for MergeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Lock(err) => Some(err),
            Self::VcsQueryFailed { source, .. } => Some(source),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
