//! Error types for git operations.
//!
//! [`GitError`] is the single error type returned by the [`GitQuery`](crate::GitQuery)
//! and [`GitWorktree`](crate::GitWorktree) traits. Expected absences (a path
//! that does not exist at a ref, two refs without a common ancestor) are not
//! errors; they come back as `None` from the query methods.

use std::path::PathBuf;

use thiserror::Error;

/// Errors returned by git operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// A requested ref or revision could not be resolved.
    #[error("not found: {message}")]
    NotFound {
        /// Human-readable description of what was missing.
        message: String,
    },

    /// A git subprocess exited unsuccessfully.
    #[error("`{command}` failed{}{}", exit_suffix(*exit_code), stderr_suffix(stderr))]
    CommandFailed {
        /// Command line summary (e.g. `"git merge-base main task/001-x"`).
        command: String,
        /// Trimmed stderr.
        stderr: String,
        /// Process exit code, if the process was not killed by a signal.
        exit_code: Option<i32>,
    },

    /// An OID string could not be parsed or was otherwise invalid.
    #[error("invalid OID `{value}`: {reason}")]
    InvalidOid {
        /// The raw value that failed validation.
        value: String,
        /// Why validation failed.
        reason: String,
    },

    /// Git produced output this crate could not interpret.
    #[error("unexpected output from `{command}`: {message}")]
    Parse {
        /// Command line summary.
        command: String,
        /// What was wrong with the output.
        message: String,
    },

    /// The repository root does not look like a git working tree.
    #[error("not a git repository: {}", path.display())]
    NotARepository {
        /// The directory that was opened.
        path: PathBuf,
    },

    /// An I/O error occurred (process spawn, temp files, working tree).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn exit_suffix(code: Option<i32>) -> String {
    code.map_or_else(String::new, |c| format!(" (exit {c})"))
}

fn stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {stderr}")
    }
}
