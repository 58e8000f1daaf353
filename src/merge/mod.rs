//! Intent-aware merge engine.
//!
//! Reconciles the changes on a task branch into its base branch in the
//! working tree, one run per call to [`MergeOrchestrator::merge_task`]:
//!
//! - **rename**: map task-side paths through base-side renames.
//! - **classify**: sort each changed file into added-only, deleted-only,
//!   excluded lock file, or needs-merge.
//! - **executor**: three-way merge, then the oracle with validation and
//!   bounded retries; the only writer to the working tree and index.
//! - **parallel**: run needs-merge files on a bounded worker pool.
//! - **orchestrator**: lock, sequence the phases, aggregate a [`MergeRun`].
//!
//! # Ordering guarantee
//!
//! Every added-only file is written before the first needs-merge file is
//! resolved. Among needs-merge files there is no ordering; results are
//! reported sorted by path so a run's report is deterministic.

pub mod classify;
pub mod executor;
pub mod orchestrator;
pub mod parallel;
pub mod rename;
pub mod retry;
pub mod types;

pub use classify::{Classification, ClassifiedFile, Classifier, MergeRefs};
pub use executor::{MergeExecutor, Resolution};
pub use orchestrator::{MergeOptions, MergeOrchestrator};
pub use parallel::ParallelCoordinator;
pub use rename::RenameMap;
pub use types::{
    ChangeKind, ChangedFile, ConflictSummary, EmptyMergeTask, FailedFile, FailureReason,
    MergeCounts, MergeOutcome, MergePhase, MergeRun, MergeTask, ResolutionMethod,
};
