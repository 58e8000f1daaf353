//! The content-merge oracle: whatever resolves a textual conflict that the
//! mechanical three-way merge could not.
//!
//! The engine treats the oracle as an opaque, possibly slow call. It never
//! sees binary content; callers decode to UTF-8 first.

use std::ffi::OsString;
use std::fmt;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use crate::exec;

// ---------------------------------------------------------------------------
// Request / error
// ---------------------------------------------------------------------------

/// One resolution request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OracleRequest<'a> {
    /// Divergence-point content; `None` when the file did not exist there.
    pub ancestor: Option<&'a str>,
    /// Base-branch content.
    pub ours: &'a str,
    /// Task-branch content.
    pub theirs: &'a str,
    /// Target path, relative to the repository root.
    pub path: &'a Path,
    /// 1 for the first attempt, incremented on every resubmission.
    pub attempt: u32,
    /// Why the previous answer was rejected, if this is a resubmission.
    pub feedback: Option<&'a str>,
}

/// The oracle could not produce a resolution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OracleError {
    /// Human-readable reason.
    pub message: String,
    /// Whether asking again could give a different answer.
    pub retryable: bool,
}

impl OracleError {
    /// A failure worth retrying (timeouts, bad exits, rate limits).
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    /// A failure every retry would repeat.
    #[must_use]
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

impl fmt::Display for OracleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for OracleError {}

// ---------------------------------------------------------------------------
// ContentMergeOracle
// ---------------------------------------------------------------------------

/// Resolves conflicting text.
///
/// Called concurrently from the merge worker pool.
pub trait ContentMergeOracle: Send + Sync {
    /// Return merged content for `request`, or an error.
    fn merge(&self, request: &OracleRequest<'_>) -> Result<String, OracleError>;
}

/// An oracle that refuses every request. Conflicting files fail, everything
/// else still merges.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoOracle;

impl ContentMergeOracle for NoOracle {
    fn merge(&self, _request: &OracleRequest<'_>) -> Result<String, OracleError> {
        Err(OracleError::permanent(
            "no merge oracle configured (set [oracle] command in .taskmerge/config.toml)",
        ))
    }
}

// ---------------------------------------------------------------------------
// CommandOracle
// ---------------------------------------------------------------------------

/// Delegates to a shell command.
///
/// The three variants are written to temp files whose paths are exported as
/// `TASKMERGE_ANCESTOR` (unset when there is no ancestor),
/// `TASKMERGE_OURS` and `TASKMERGE_THEIRS`. `TASKMERGE_PATH` holds the target
/// path, `TASKMERGE_ATTEMPT` the attempt number and `TASKMERGE_FEEDBACK` the
/// previous validation error (empty on the first attempt). The merged
/// content is read from stdout; a non-zero exit, a timeout, or non-UTF-8
/// output is an error.
#[derive(Clone, Debug)]
pub struct CommandOracle {
    command: String,
    cwd: PathBuf,
    timeout: Duration,
}

impl CommandOracle {
    /// An oracle running `command` from `cwd`.
    #[must_use]
    pub fn new(command: impl Into<String>, cwd: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            cwd: cwd.into(),
            timeout,
        }
    }
}

fn stage_variant(dir: &Path, name: &str, content: &str) -> Result<OsString, OracleError> {
    let path = dir.join(name);
    let mut file = std::fs::File::create(&path)
        .map_err(|e| OracleError::new(format!("write {name} variant: {e}")))?;
    file.write_all(content.as_bytes())
        .map_err(|e| OracleError::new(format!("write {name} variant: {e}")))?;
    Ok(path.into_os_string())
}

impl ContentMergeOracle for CommandOracle {
    fn merge(&self, request: &OracleRequest<'_>) -> Result<String, OracleError> {
        let scratch = tempfile::Builder::new()
            .prefix("taskmerge-oracle-")
            .tempdir()
            .map_err(|e| OracleError::new(format!("create scratch dir: {e}")))?;

        let mut env = vec![
            ("TASKMERGE_OURS", stage_variant(scratch.path(), "ours", request.ours)?),
            (
                "TASKMERGE_THEIRS",
                stage_variant(scratch.path(), "theirs", request.theirs)?,
            ),
            ("TASKMERGE_PATH", request.path.as_os_str().to_owned()),
            ("TASKMERGE_ATTEMPT", request.attempt.to_string().into()),
            (
                "TASKMERGE_FEEDBACK",
                request.feedback.unwrap_or_default().into(),
            ),
        ];
        if let Some(ancestor) = request.ancestor {
            env.push((
                "TASKMERGE_ANCESTOR",
                stage_variant(scratch.path(), "ancestor", ancestor)?,
            ));
        }

        debug!(path = %request.path.display(), attempt = request.attempt, "invoking merge oracle");
        let out = exec::run_shell(&self.command, &self.cwd, &env, None, self.timeout)
            .map_err(|e| OracleError::new(format!("spawn `{}`: {e}", self.command)))?;
        if !out.success() {
            return Err(OracleError::new(format!(
                "oracle `{}` failed: {}",
                self.command,
                out.failure_summary()
            )));
        }
        String::from_utf8(out.stdout)
            .map_err(|_| OracleError::new(format!("oracle `{}` printed non-UTF-8 output", self.command)))
    }
}
