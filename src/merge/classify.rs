//! Classification of task-branch changes.
//!
//! Every [`ChangedFile`] lands in exactly one [`Classification`]:
//!
//! | Base branch (target) | Task branch (path) | Lock file? | Class       |
//! |----------------------|--------------------|------------|-------------|
//! | absent               | present            | any        | added-only  |
//! | present              | absent             | any        | deleted-only|
//! | absent               | absent             | any        | deleted-only|
//! | present              | present            | yes        | excluded    |
//! | present              | present            | no         | needs-merge |
//!
//! Absent on both sides means the base branch removed the file too; the
//! deletion is already in effect and applying it again is a no-op.

use std::path::Path;

use taskmerge_git::{GitError, GitQuery};

use crate::config::PathGlob;

use super::types::{ChangedFile, MergeTask};

/// What must happen to one changed file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Classification {
    /// Only the task branch has the file: copy its content to the target.
    AddedOnly {
        /// Task-branch content.
        content: Vec<u8>,
    },
    /// The task branch removed the file: remove the target.
    DeletedOnly,
    /// A package-manager lock file present on both sides: keep the base
    /// version.
    Excluded {
        /// Base-branch content.
        base_content: Vec<u8>,
    },
    /// Present on both sides: three-way merge.
    NeedsMerge(MergeTask),
}

impl Classification {
    /// Short label for logs and reports.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::AddedOnly { .. } => "added-only",
            Self::DeletedOnly => "deleted-only",
            Self::Excluded { .. } => "excluded",
            Self::NeedsMerge(_) => "needs-merge",
        }
    }
}

/// A changed file with its class.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassifiedFile {
    pub file: ChangedFile,
    pub class: Classification,
}

/// Classify from already-fetched contents.
///
/// `base` is the base-branch content at the target path, `task` the
/// task-branch content at the original path, `ancestor` the divergence-point
/// content at the original path.
#[must_use]
pub fn classify_contents(
    target: &Path,
    is_lockfile: bool,
    ancestor: Option<Vec<u8>>,
    base: Option<Vec<u8>>,
    task: Option<Vec<u8>>,
) -> Classification {
    match (base, task) {
        (None, Some(content)) => Classification::AddedOnly { content },
        (_, None) => Classification::DeletedOnly,
        (Some(base_content), Some(_)) if is_lockfile => Classification::Excluded { base_content },
        (Some(base), Some(task)) => {
            // Both sides present, so the task is never empty.
            match MergeTask::new(target, ancestor, Some(base), Some(task)) {
                Ok(t) => Classification::NeedsMerge(t),
                Err(_) => Classification::DeletedOnly,
            }
        }
    }
}

/// Is `path` a package-manager lock file?
#[must_use]
pub fn is_lockfile(globs: &[PathGlob], path: &Path) -> bool {
    globs.iter().any(|g| g.matches(path))
}

/// The commits a run classifies against. Resolved once per run so every
/// lookup sees the same snapshot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeRefs {
    /// Divergence point.
    pub merge_base: String,
    /// Base-branch tip.
    pub base: String,
    /// Task-branch tip.
    pub task: String,
}

/// Fetches contents through the VCS and classifies.
pub struct Classifier<'a> {
    repo: &'a dyn GitQuery,
    lockfiles: &'a [PathGlob],
}

impl<'a> Classifier<'a> {
    #[must_use]
    pub const fn new(repo: &'a dyn GitQuery, lockfiles: &'a [PathGlob]) -> Self {
        Self { repo, lockfiles }
    }

    /// Classify one file.
    ///
    /// Base content is read at the mapped target; task and ancestor content
    /// at the original path.
    pub fn classify(
        &self,
        file: &ChangedFile,
        refs: &MergeRefs,
    ) -> Result<Classification, GitError> {
        let base = self.repo.content_at(&refs.base, &file.target)?;
        let task = self.repo.content_at(&refs.task, &file.path)?;
        let ancestor = if base.is_some() && task.is_some() {
            self.repo.content_at(&refs.merge_base, &file.path)?
        } else {
            None
        };
        Ok(classify_contents(
            &file.target,
            is_lockfile(self.lockfiles, &file.target) || is_lockfile(self.lockfiles, &file.path),
            ancestor,
            base,
            task,
        ))
    }

    /// Classify every file, preserving order.
    pub fn classify_all(
        &self,
        files: Vec<ChangedFile>,
        refs: &MergeRefs,
    ) -> Result<Vec<ClassifiedFile>, GitError> {
        files
            .into_iter()
            .map(|file| {
                let class = self.classify(&file, refs)?;
                Ok(ClassifiedFile { file, class })
            })
            .collect()
    }
}
