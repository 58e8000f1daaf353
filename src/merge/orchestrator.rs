//! The single entry point: merge one task branch into its base branch.
//!
//! A run walks the phases of [`MergePhase`] strictly in order:
//!
//! ```text
//! Idle → LockHeld → DetectingConflicts → ClassifyingFiles → ResolvingSimple
//!      → ResolvingParallel → Aggregating → Released
//! ```
//!
//! with two early exits. A lock that cannot be taken ends the run with
//! [`MergeError::LockUnavailable`] before any VCS query. A task whose branch
//! and base have not both moved since the divergence point ends in a trivial
//! success right after `DetectingConflicts`; a plain merge handles it.
//!
//! The task lock is held by a [`LockGuard`](crate::lock::LockGuard) for the
//! whole run, so it is released on every way out, including panics in a
//! collaborator.

use std::path::PathBuf;

use tracing::{debug, info, info_span, warn};

use taskmerge_git::{ConflictSource, GitQuery, GitWorktree};

use crate::config::{PathGlob, TaskmergeConfig};
use crate::error::MergeError;
use crate::lock::{LockManager, LockSettings};
use crate::oracle::ContentMergeOracle;
use crate::task::TaskName;
use crate::validate::ValidatorSet;

use super::classify::{Classification, ClassifiedFile, Classifier, MergeRefs};
use super::executor::MergeExecutor;
use super::parallel::ParallelCoordinator;
use super::rename::RenameMap;
use super::types::{
    ChangedFile, ConflictSummary, FailedFile, FailureReason, MergeCounts, MergeOutcome, MergePhase,
    MergeRun, MergeTask, ResolutionMethod,
};

// ---------------------------------------------------------------------------
// MergeOptions
// ---------------------------------------------------------------------------

/// Per-run knobs. Built from [`TaskmergeConfig`] or defaulted.
#[derive(Clone, Debug)]
pub struct MergeOptions {
    /// Task lock timing.
    pub lock: LockSettings,
    /// Needs-merge files resolved at once.
    pub max_concurrency: usize,
    /// Extra oracle rounds after the first.
    pub validation_retries: u32,
    /// Package-manager lock file patterns.
    pub lockfiles: Vec<PathGlob>,
}

impl MergeOptions {
    /// Options from a loaded config.
    ///
    /// # Errors
    /// Returns the offending pattern if a lock file glob does not compile.
    pub fn from_config(config: &TaskmergeConfig) -> Result<Self, String> {
        Ok(Self {
            lock: config.lock.task_settings(),
            max_concurrency: config.merge.max_concurrency,
            validation_retries: config.merge.validation_retries,
            lockfiles: config.merge.lockfile_globs()?,
        })
    }
}

impl Default for MergeOptions {
    fn default() -> Self {
        let merge = crate::config::MergeConfig::default();
        Self {
            lock: LockSettings::task(),
            max_concurrency: merge.max_concurrency,
            validation_retries: merge.validation_retries,
            // The default patterns are all plain file names.
            lockfiles: merge.lockfile_globs().unwrap_or_default(),
        }
    }
}

// ---------------------------------------------------------------------------
// MergeOrchestrator
// ---------------------------------------------------------------------------

/// Sequences one merge run. Holds no state between runs; several
/// orchestrators (or threads sharing one) may run different tasks at once.
pub struct MergeOrchestrator<'a, R> {
    repo: &'a R,
    locks: &'a LockManager,
    oracle: &'a dyn ContentMergeOracle,
    validators: &'a ValidatorSet,
    options: MergeOptions,
}

/// Resolved branch tips for one run.
struct Branches {
    task: TaskName,
    task_branch: String,
    refs: MergeRefs,
}

impl<'a, R: GitQuery + GitWorktree> MergeOrchestrator<'a, R> {
    pub fn new(
        repo: &'a R,
        locks: &'a LockManager,
        oracle: &'a dyn ContentMergeOracle,
        validators: &'a ValidatorSet,
        options: MergeOptions,
    ) -> Self {
        Self {
            repo,
            locks,
            oracle,
            validators,
            options,
        }
    }

    #[must_use]
    pub const fn options(&self) -> &MergeOptions {
        &self.options
    }

    /// Merge `task/<task>` into `base`, writing and staging results in the
    /// working tree. Never commits.
    ///
    /// # Errors
    /// Shared-setup failures: lock contention, wrong checkout, missing
    /// branches, unrelated histories, or a VCS query the run depends on.
    /// Per-file failures are reported in the returned [`MergeRun`].
    pub fn merge_task(&self, task: &str, base: &str) -> Result<MergeRun, MergeError> {
        let span = info_span!("merge_task", task, base);
        let _enter = span.enter();

        let mut run = MergeRun {
            task: task.to_owned(),
            base_branch: base.to_owned(),
            ..MergeRun::default()
        };
        enter(&mut run, MergePhase::Idle);

        let name = TaskName::new(task).map_err(|e| invalid_name(task, &e))?;

        let mut guard = self
            .locks
            .acquire(&name.lock_name(), &self.options.lock)
            .map_err(|e| MergeError::from_lock(task, e))?;
        enter(&mut run, MergePhase::LockHeld);

        let result = self.run_locked(name, &mut run);

        // The guard would release on drop too; releasing here lets a failed
        // release show up in the log.
        if let Err(e) = guard.release() {
            warn!(lock = guard.name(), error = %e, "could not release task lock");
        }
        enter(&mut run, MergePhase::Released);

        result.map(|()| {
            info!(
                success = run.success(),
                trivial = run.trivial,
                resolved = run.resolved_files.len(),
                failed = run.failed_files.len(),
                "merge finished"
            );
            run
        })
    }

    /// Dry-run conflict check only: no lock, no writes.
    ///
    /// # Errors
    /// Missing branches, unrelated histories, or a failed VCS query.
    pub fn check(&self, task: &str, base: &str) -> Result<ConflictSummary, MergeError> {
        let name = TaskName::new(task).map_err(|e| invalid_name(task, &e))?;
        let branches = self.resolve_branches(name, base)?;
        self.conflict_summary(&branches)
    }

    // -----------------------------------------------------------------------
    // Phases
    // -----------------------------------------------------------------------

    fn run_locked(&self, name: TaskName, run: &mut MergeRun) -> Result<(), MergeError> {
        let base = run.base_branch.clone();
        self.ensure_on_base(&base)?;

        enter(run, MergePhase::DetectingConflicts);
        let branches = self.resolve_branches(name, &base)?;
        run.task_branch.clone_from(&branches.task_branch);
        run.merge_base = Some(branches.refs.merge_base.clone());

        let refs = &branches.refs;
        if refs.task == refs.merge_base || refs.base == refs.merge_base {
            info!(task = %branches.task, "no divergence, nothing to reconcile");
            run.trivial = true;
            return Ok(());
        }
        run.conflicts = self.conflict_summary(&branches)?;

        enter(run, MergePhase::ClassifyingFiles);
        let renames = self.rename_map(refs);
        run.renames = renames
            .iter()
            .map(|(from, to)| (from.to_path_buf(), to.to_path_buf()))
            .collect();

        let changed: Vec<ChangedFile> = self
            .repo
            .changed_files(&refs.merge_base, &refs.task)
            .map_err(MergeError::vcs("listing files changed on the task branch"))?
            .into_iter()
            .map(|entry| {
                let target = renames.resolve(&entry.path).to_path_buf();
                ChangedFile::new(entry.path, entry.kind).with_target(target)
            })
            .collect();

        let classified = Classifier::new(self.repo, &self.options.lockfiles)
            .classify_all(changed, refs)
            .map_err(MergeError::vcs("reading file contents"))?;
        for c in &classified {
            debug!(
                path = %c.file.path.display(),
                target = %c.file.target.display(),
                class = c.class.label(),
                "classified"
            );
        }

        let executor = MergeExecutor::new(
            self.repo,
            self.repo,
            self.oracle,
            self.validators,
            self.options.validation_retries,
        );

        enter(run, MergePhase::ResolvingSimple);
        let needs_merge = resolve_simple(&executor, classified, run);

        enter(run, MergePhase::ResolvingParallel);
        let outcomes =
            ParallelCoordinator::new(self.options.max_concurrency).run(&executor, &needs_merge);

        enter(run, MergePhase::Aggregating);
        for outcome in outcomes {
            match outcome {
                MergeOutcome::Resolved { path, method } => {
                    match method {
                        ResolutionMethod::Mechanical => run.counts.mechanical += 1,
                        ResolutionMethod::Oracle { .. } => run.counts.oracle += 1,
                    }
                    run.resolved_files.push(path);
                }
                MergeOutcome::Failed { path, reason } => {
                    run.failed_files.push(FailedFile { path, reason });
                }
            }
        }
        finish(run);
        Ok(())
    }

    fn ensure_on_base(&self, base: &str) -> Result<(), MergeError> {
        let actual = self
            .repo
            .current_branch()
            .map_err(MergeError::vcs("reading the checked-out branch"))?;
        if actual.as_deref() == Some(base) {
            Ok(())
        } else {
            Err(MergeError::BaseNotCheckedOut {
                expected: base.to_owned(),
                actual,
            })
        }
    }

    fn resolve_branches(&self, task: TaskName, base: &str) -> Result<Branches, MergeError> {
        let task_branch = task.branch();
        let tip = |branch: &str| -> Result<String, MergeError> {
            self.repo
                .rev_parse_opt(branch)
                .map_err(MergeError::vcs(format!("resolving '{branch}'")))?
                .map(|oid| oid.to_string())
                .ok_or_else(|| MergeError::BranchNotFound {
                    branch: branch.to_owned(),
                })
        };
        let base_tip = tip(base)?;
        let task_tip = tip(&task_branch)?;

        let merge_base = self
            .repo
            .merge_base(&base_tip, &task_tip)
            .map_err(MergeError::vcs("finding the divergence point"))?
            .ok_or_else(|| MergeError::NoCommonAncestor {
                base: base.to_owned(),
                task: task_branch.clone(),
            })?
            .to_string();

        Ok(Branches {
            task,
            task_branch,
            refs: MergeRefs {
                merge_base,
                base: base_tip,
                task: task_tip,
            },
        })
    }

    fn conflict_summary(&self, branches: &Branches) -> Result<ConflictSummary, MergeError> {
        let check = self
            .repo
            .dry_run_conflict_check(&branches.refs.base, &branches.refs.task)
            .map_err(MergeError::vcs("running the dry-run conflict check"))?;
        let heuristic = check.source == ConflictSource::BothSidesChanged;
        if heuristic {
            warn!(
                task = %branches.task,
                "merge-tree unavailable, conflicts estimated from files changed on both sides"
            );
        }
        debug!(
            has_conflicts = check.has_conflicts,
            files = check.conflicting_files.len(),
            source = %check.source,
            "dry-run conflict check"
        );
        Ok(ConflictSummary {
            has_conflicts: check.has_conflicts,
            conflicting_files: check.conflicting_files,
            heuristic,
        })
    }

    /// Base-side renames since the divergence point. Failure degrades to
    /// the identity mapping.
    fn rename_map(&self, refs: &MergeRefs) -> RenameMap {
        match self.repo.detect_renames(&refs.merge_base, &refs.base) {
            Ok(pairs) => {
                let map = RenameMap::from_renames(&pairs);
                if !map.is_empty() {
                    debug!(renames = map.len(), "base branch renamed files");
                }
                map
            }
            Err(e) => {
                warn!(error = %e, "rename detection failed, using paths as-is");
                RenameMap::identity()
            }
        }
    }
}

/// Apply added-only files, then deletions, then lock file exclusions.
/// Everything added-only is on disk before this returns. Returns the
/// needs-merge tasks.
fn resolve_simple(
    executor: &MergeExecutor<'_>,
    classified: Vec<ClassifiedFile>,
    run: &mut MergeRun,
) -> Vec<MergeTask> {
    let mut added = Vec::new();
    let mut deleted = Vec::new();
    let mut excluded = Vec::new();
    let mut needs_merge = Vec::new();
    for ClassifiedFile { file, class } in classified {
        match class {
            Classification::AddedOnly { content } => added.push((file.target, content)),
            Classification::DeletedOnly => deleted.push(file.target),
            Classification::Excluded { base_content } => excluded.push((file.target, base_content)),
            Classification::NeedsMerge(task) => needs_merge.push(task),
        }
    }

    for (target, content) in added {
        match executor.write_file(&target, &content) {
            Ok(()) => {
                info!(path = %target.display(), "added");
                run.counts.added += 1;
                run.resolved_files.push(target);
            }
            Err(reason) => fail(run, target, reason),
        }
    }

    for target in deleted {
        match executor.remove_file(&target) {
            Ok(()) => {
                info!(path = %target.display(), "deleted");
                run.counts.deleted += 1;
                run.resolved_files.push(target);
            }
            Err(reason) => fail(run, target, reason),
        }
    }

    for (target, base_content) in excluded {
        // The working tree is on base, so this is normally a no-op; it
        // restores the base version if something touched the file.
        match executor.write_file(&target, &base_content) {
            Ok(()) => {
                info!(path = %target.display(), "lock file kept at base version");
                run.counts.excluded += 1;
                run.excluded_lock_files.push(target);
            }
            Err(reason) => fail(run, target, reason),
        }
    }

    needs_merge
}

fn fail(run: &mut MergeRun, path: PathBuf, reason: FailureReason) {
    warn!(path = %path.display(), %reason, "could not apply");
    run.failed_files.push(FailedFile { path, reason });
}

fn finish(run: &mut MergeRun) {
    run.resolved_files.sort();
    run.resolved_files.dedup();
    run.excluded_lock_files.sort();
    run.failed_files.sort_by(|a, b| a.path.cmp(&b.path));
    run.counts = MergeCounts {
        failed: run.failed_files.len(),
        ..run.counts
    };
}

fn enter(run: &mut MergeRun, phase: MergePhase) {
    debug!(%phase, "phase");
    run.phases.push(phase);
}

fn invalid_name(task: &str, err: &crate::task::TaskError) -> MergeError {
    let reason = match err {
        crate::task::TaskError::InvalidName { reason, .. } => reason.clone(),
        other => other.to_string(),
    };
    MergeError::InvalidTaskName {
        name: task.to_owned(),
        reason,
    }
}
