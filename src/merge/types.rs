//! Core types for the task merge engine.
//!
//! Defines the data structures that flow through the
//! classify → resolve → aggregate pipeline.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

pub use taskmerge_git::ChangeKind;

// ---------------------------------------------------------------------------
// ChangedFile
// ---------------------------------------------------------------------------

/// One file the task branch changed since the divergence point.
///
/// `path` is where the file lives on the task branch; `target` is where its
/// content belongs on the base branch. They differ only when the base branch
/// renamed the file after the divergence point.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChangedFile {
    /// Path on the task branch.
    pub path: PathBuf,
    /// Type of change on the task branch.
    pub kind: ChangeKind,
    /// Path to read base content from and write the result to.
    pub target: PathBuf,
}

impl ChangedFile {
    /// A change whose target is its own path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, kind: ChangeKind) -> Self {
        let path = path.into();
        Self {
            target: path.clone(),
            path,
            kind,
        }
    }

    /// Redirect the write target (base-side rename).
    #[must_use]
    pub fn with_target(mut self, target: impl Into<PathBuf>) -> Self {
        self.target = target.into();
        self
    }

    /// `true` if the base branch moved this file.
    #[must_use]
    pub fn is_renamed(&self) -> bool {
        self.path != self.target
    }
}

// ---------------------------------------------------------------------------
// MergeTask
// ---------------------------------------------------------------------------

/// A file that needs a three-way merge.
///
/// Each variant is `None` when the file does not exist at that point. At
/// least one is always present: [`MergeTask::new`] refuses to build a task
/// from three absent variants.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeTask {
    target: PathBuf,
    ancestor: Option<Vec<u8>>,
    ours: Option<Vec<u8>>,
    theirs: Option<Vec<u8>>,
}

/// Returned by [`MergeTask::new`] when every variant is absent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmptyMergeTask {
    /// The target path of the rejected task.
    pub target: PathBuf,
}

impl fmt::Display for EmptyMergeTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: absent at the divergence point and on both branches",
            self.target.display()
        )
    }
}

impl std::error::Error for EmptyMergeTask {}

impl MergeTask {
    /// Build a task.
    ///
    /// `ancestor` is the divergence-point content, `ours` the base branch,
    /// `theirs` the task branch.
    pub fn new(
        target: impl Into<PathBuf>,
        ancestor: Option<Vec<u8>>,
        ours: Option<Vec<u8>>,
        theirs: Option<Vec<u8>>,
    ) -> Result<Self, EmptyMergeTask> {
        let target = target.into();
        if ancestor.is_none() && ours.is_none() && theirs.is_none() {
            return Err(EmptyMergeTask { target });
        }
        Ok(Self {
            target,
            ancestor,
            ours,
            theirs,
        })
    }

    /// Where the result is written.
    #[must_use]
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Divergence-point content.
    #[must_use]
    pub fn ancestor(&self) -> Option<&[u8]> {
        self.ancestor.as_deref()
    }

    /// Base-branch content.
    #[must_use]
    pub fn ours(&self) -> Option<&[u8]> {
        self.ours.as_deref()
    }

    /// Task-branch content.
    #[must_use]
    pub fn theirs(&self) -> Option<&[u8]> {
        self.theirs.as_deref()
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// How a needs-merge file was resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum ResolutionMethod {
    /// The deterministic three-way merge was clean.
    Mechanical,
    /// The oracle produced the content.
    Oracle {
        /// Oracle calls made, including the accepted one.
        attempts: u32,
    },
}

/// Why one file could not be resolved. Scoped to that file; never aborts
/// the run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// The oracle returned an error on every attempt.
    OracleFailed {
        /// Last oracle error.
        message: String,
        /// Oracle calls made.
        attempts: u32,
    },
    /// The oracle answered, but the validator rejected every answer.
    ValidationExhausted {
        /// Last validation error.
        message: String,
        /// Oracle calls made.
        attempts: u32,
    },
    /// The deterministic merge itself could not run.
    MechanicalMergeFailed {
        /// The underlying error.
        message: String,
    },
    /// One of the variants is not UTF-8 text; it is never sent to the
    /// oracle.
    BinaryContent,
    /// The resolved content could not be written or staged.
    WriteFailed {
        /// The underlying error.
        message: String,
    },
    /// The executor panicked while resolving this file.
    ExecutorPanicked {
        /// The panic payload, when it was a string.
        message: String,
    },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OracleFailed { message, attempts } => {
                write!(f, "merge oracle failed after {attempts} attempt(s): {message}")
            }
            Self::ValidationExhausted { message, attempts } => write!(
                f,
                "oracle output still invalid after {attempts} attempt(s): {message}"
            ),
            Self::MechanicalMergeFailed { message } => {
                write!(f, "three-way merge could not run: {message}")
            }
            Self::BinaryContent => f.write_str("binary content cannot be merged automatically"),
            Self::WriteFailed { message } => write!(f, "could not write result: {message}"),
            Self::ExecutorPanicked { message } => write!(f, "merge executor panicked: {message}"),
        }
    }
}

/// Terminal result of one [`MergeTask`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Content written and staged at `path`.
    Resolved {
        /// Target path.
        path: PathBuf,
        /// How the content was produced.
        method: ResolutionMethod,
    },
    /// Nothing was written for `path`.
    Failed {
        /// Target path.
        path: PathBuf,
        /// Why.
        reason: FailureReason,
    },
}

impl MergeOutcome {
    /// The target path.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Resolved { path, .. } | Self::Failed { path, .. } => path,
        }
    }

    /// `true` for [`MergeOutcome::Resolved`].
    #[must_use]
    pub const fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved { .. })
    }
}

// ---------------------------------------------------------------------------
// MergeRun
// ---------------------------------------------------------------------------

/// States of one orchestrator run, in order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePhase {
    Idle,
    LockHeld,
    DetectingConflicts,
    ClassifyingFiles,
    ResolvingSimple,
    ResolvingParallel,
    Aggregating,
    Released,
}

impl fmt::Display for MergePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::LockHeld => "lock-held",
            Self::DetectingConflicts => "detecting-conflicts",
            Self::ClassifyingFiles => "classifying-files",
            Self::ResolvingSimple => "resolving-simple",
            Self::ResolvingParallel => "resolving-parallel",
            Self::Aggregating => "aggregating",
            Self::Released => "released",
        };
        f.write_str(s)
    }
}

/// A file that could not be resolved.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FailedFile {
    /// Target path.
    pub path: PathBuf,
    /// Why.
    pub reason: FailureReason,
}

/// Summary of the dry-run conflict check.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ConflictSummary {
    /// Whether the VCS reported (or the heuristic guessed) conflicts.
    pub has_conflicts: bool,
    /// The reported paths.
    pub conflicting_files: Vec<PathBuf>,
    /// `true` when the paths come from the changed-on-both-sides heuristic
    /// rather than a real three-way merge, and may over-report.
    pub heuristic: bool,
}

/// Per-category counts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MergeCounts {
    pub added: usize,
    pub deleted: usize,
    pub mechanical: usize,
    pub oracle: usize,
    pub excluded: usize,
    pub failed: usize,
}

/// Aggregate result of one orchestrator run. Fresh per run, never
/// persisted.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MergeRun {
    /// Task name.
    pub task: String,
    /// Branch merged into.
    pub base_branch: String,
    /// Branch merged from.
    pub task_branch: String,
    /// Divergence-point commit.
    pub merge_base: Option<String>,
    /// Nothing diverged; no files were touched.
    pub trivial: bool,
    /// Dry-run conflict check result.
    pub conflicts: ConflictSummary,
    /// Base-side renames applied, `(task path, target path)`.
    pub renames: Vec<(PathBuf, PathBuf)>,
    /// Every target path written or removed, sorted.
    pub resolved_files: Vec<PathBuf>,
    /// Files that could not be resolved, sorted by path.
    pub failed_files: Vec<FailedFile>,
    /// Package-manager lock files kept at their base version, sorted.
    pub excluded_lock_files: Vec<PathBuf>,
    /// Per-category counts.
    pub counts: MergeCounts,
    /// Phases visited, in order.
    pub phases: Vec<MergePhase>,
}

impl MergeRun {
    /// `true` iff no file failed.
    #[must_use]
    pub fn success(&self) -> bool {
        self.failed_files.is_empty()
    }
}

impl fmt::Display for MergeRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.trivial {
            return write!(
                f,
                "{} has nothing to reconcile with {}",
                self.task_branch, self.base_branch
            );
        }
        let c = &self.counts;
        write!(
            f,
            "{} into {}: {} added, {} deleted, {} merged ({} mechanical, {} oracle), {} lock file(s) kept, {} failed",
            self.task_branch,
            self.base_branch,
            c.added,
            c.deleted,
            c.mechanical + c.oracle,
            c.mechanical,
            c.oracle,
            c.excluded,
            c.failed
        )?;
        for failed in &self.failed_files {
            write!(f, "\n  FAILED {}: {}", failed.path.display(), failed.reason)?;
        }
        Ok(())
    }
}
