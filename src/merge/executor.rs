//! Resolution and application of single files.
//!
//! The executor is the only writer to the working tree and index. Each file
//! is fully resolved in memory before anything touches disk, and each write
//! is a temp-file-then-rename in the target's directory, so a file is either
//! untouched or fully replaced.

use std::fs;
use std::io::{self, Write as _};
use std::path::Path;

use tracing::{debug, info, warn};

use taskmerge_git::{GitQuery, GitWorktree};

use crate::oracle::{ContentMergeOracle, OracleRequest};
use crate::validate::{Validation, ValidatorSet};

use super::retry::{self, Attempt};
use super::types::{FailureReason, MergeOutcome, MergeTask, ResolutionMethod};

/// Content ready to write, and how it was produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolution {
    pub content: Vec<u8>,
    pub method: ResolutionMethod,
}

/// One failed oracle round.
#[derive(Clone, Debug, PartialEq, Eq)]
enum RoundError {
    /// The oracle itself failed.
    Oracle(String),
    /// The oracle answered; the validator said no.
    Invalid(String),
}

/// Resolves [`MergeTask`]s and applies simple changes.
///
/// Shared by reference across the worker pool.
pub struct MergeExecutor<'a> {
    repo: &'a dyn GitQuery,
    worktree: &'a dyn GitWorktree,
    oracle: &'a dyn ContentMergeOracle,
    validators: &'a ValidatorSet,
    max_oracle_attempts: u32,
}

impl<'a> MergeExecutor<'a> {
    /// `validation_retries` extra oracle rounds follow the first one.
    #[must_use]
    pub fn new(
        repo: &'a dyn GitQuery,
        worktree: &'a dyn GitWorktree,
        oracle: &'a dyn ContentMergeOracle,
        validators: &'a ValidatorSet,
        validation_retries: u32,
    ) -> Self {
        Self {
            repo,
            worktree,
            oracle,
            validators,
            max_oracle_attempts: validation_retries.saturating_add(1),
        }
    }

    /// Resolve, then write and stage.
    #[must_use]
    pub fn execute(&self, task: &MergeTask) -> MergeOutcome {
        let path = task.target().to_path_buf();
        let outcome = self
            .resolve(task)
            .and_then(|resolution| {
                self.write_file(task.target(), &resolution.content)?;
                Ok(resolution.method)
            });
        match outcome {
            Ok(method) => {
                info!(path = %path.display(), ?method, "resolved");
                MergeOutcome::Resolved { path, method }
            }
            Err(reason) => {
                warn!(path = %path.display(), %reason, "could not resolve");
                MergeOutcome::Failed { path, reason }
            }
        }
    }

    /// Produce the merged content without touching disk.
    ///
    /// 1. Identical sides need no merge.
    /// 2. The deterministic three-way merge; a clean result is final.
    /// 3. On textual conflict, the oracle, validated and retried with the
    ///    validator's complaint as feedback.
    pub fn resolve(&self, task: &MergeTask) -> Result<Resolution, FailureReason> {
        let ancestor = task.ancestor();
        let ours = task.ours().unwrap_or_default();
        let theirs = task.theirs().unwrap_or_default();

        if ours == theirs {
            return Ok(Resolution {
                content: ours.to_vec(),
                method: ResolutionMethod::Mechanical,
            });
        }

        let all_text = [ancestor.unwrap_or_default(), ours, theirs]
            .iter()
            .all(|v| std::str::from_utf8(v).is_ok());

        match self
            .repo
            .merge_file(ancestor.unwrap_or_default(), ours, theirs)
        {
            Ok(Some(content)) => {
                return Ok(Resolution {
                    content,
                    method: ResolutionMethod::Mechanical,
                });
            }
            Ok(None) => {
                debug!(path = %task.target().display(), "textual conflict, asking oracle");
            }
            Err(_) if !all_text => return Err(FailureReason::BinaryContent),
            Err(e) => {
                return Err(FailureReason::MechanicalMergeFailed {
                    message: e.to_string(),
                });
            }
        }

        let (Ok(ours), Ok(theirs)) = (std::str::from_utf8(ours), std::str::from_utf8(theirs)) else {
            return Err(FailureReason::BinaryContent);
        };
        let ancestor = match ancestor.map(std::str::from_utf8) {
            None => None,
            Some(Ok(text)) => Some(text),
            Some(Err(_)) => return Err(FailureReason::BinaryContent),
        };

        self.ask_oracle(task.target(), ancestor, ours, theirs)
    }

    fn ask_oracle(
        &self,
        path: &Path,
        ancestor: Option<&str>,
        ours: &str,
        theirs: &str,
    ) -> Result<Resolution, FailureReason> {
        let validator = self.validators.for_path(path);

        let result = retry::bounded(self.max_oracle_attempts, |attempt, previous| {
            let feedback = match previous {
                Some(RoundError::Invalid(message)) => Some(message.as_str()),
                _ => None,
            };
            let request = OracleRequest {
                ancestor,
                ours,
                theirs,
                path,
                attempt,
                feedback,
            };
            let content = match self.oracle.merge(&request) {
                Ok(content) => content,
                Err(e) => {
                    warn!(path = %path.display(), attempt, error = %e, "oracle failed");
                    let round = RoundError::Oracle(e.message);
                    return if e.retryable {
                        Attempt::Retry(round)
                    } else {
                        Attempt::Fatal(round)
                    };
                }
            };
            match validator.map(|v| v.validate(path, &content)) {
                None | Some(Validation::Valid) => Attempt::Done(content),
                Some(Validation::Invalid { message }) => {
                    warn!(path = %path.display(), attempt, %message, "oracle output rejected");
                    Attempt::Retry(RoundError::Invalid(message))
                }
            }
        });

        match result {
            Ok((content, attempts)) => Ok(Resolution {
                content: content.into_bytes(),
                method: ResolutionMethod::Oracle { attempts },
            }),
            Err(err) => {
                let attempts = err.attempts();
                Err(match err.into_error() {
                    RoundError::Oracle(message) => FailureReason::OracleFailed { message, attempts },
                    RoundError::Invalid(message) => {
                        FailureReason::ValidationExhausted { message, attempts }
                    }
                })
            }
        }
    }

    /// Atomically replace `target` with `content` and stage it.
    ///
    /// Skips the write (but still stages) when the file already holds
    /// exactly `content`.
    pub fn write_file(&self, target: &Path, content: &[u8]) -> Result<(), FailureReason> {
        let full = self.repo.root().join(target);
        let unchanged = fs::read(&full).is_ok_and(|existing| existing == content);
        if !unchanged {
            write_atomic(&full, content).map_err(|e| FailureReason::WriteFailed {
                message: format!("{}: {e}", full.display()),
            })?;
        }
        self.worktree
            .stage_path(target)
            .map_err(|e| FailureReason::WriteFailed {
                message: format!("stage {}: {e}", target.display()),
            })
    }

    /// Remove `target` from the working tree and stage the removal. A
    /// missing file is fine.
    pub fn remove_file(&self, target: &Path) -> Result<(), FailureReason> {
        let full = self.repo.root().join(target);
        match fs::remove_file(&full) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(FailureReason::WriteFailed {
                    message: format!("remove {}: {e}", full.display()),
                });
            }
        }
        self.worktree
            .stage_removal(target)
            .map_err(|e| FailureReason::WriteFailed {
                message: format!("stage removal of {}: {e}", target.display()),
            })
    }
}

/// Write via a sibling temp file and rename over `path`, keeping the
/// existing file's permissions.
fn write_atomic(path: &Path, content: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    fs::create_dir_all(parent)?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".taskmerge-")
        .tempfile_in(parent)?;
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;
    match fs::metadata(path) {
        Ok(meta) => tmp.as_file().set_permissions(meta.permissions())?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => set_default_mode(tmp.as_file())?,
        Err(e) => return Err(e),
    }
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(unix)]
fn set_default_mode(file: &fs::File) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt as _;
    file.set_permissions(fs::Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
#[allow(clippy::unnecessary_wraps)]
const fn set_default_mode(_file: &fs::File) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::oracle::{NoOracle, OracleError};
    use crate::validate::SyntaxValidator;

    /// A real repo (for `merge-file` and staging) plus scratch files.
    fn repo() -> (tempfile::TempDir, taskmerge_git::GitCli) {
        let dir = tempfile::tempdir().unwrap();
        let run = |args: &[&str]| {
            let out = std::process::Command::new("git")
                .args(args)
                .current_dir(dir.path())
                .output()
                .unwrap();
            assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
        };
        run(&["init", "--quiet"]);
        run(&["config", "user.name", "Test"]);
        run(&["config", "user.email", "test@test.com"]);
        let cli = taskmerge_git::GitCli::open(dir.path()).unwrap();
        (dir, cli)
    }

    /// Replays canned answers and records requests.
    struct Scripted {
        answers: Mutex<Vec<Result<String, OracleError>>>,
        seen: Mutex<Vec<(u32, Option<String>)>>,
    }

    impl Scripted {
        fn new(answers: Vec<Result<&str, &str>>) -> Self {
            let mut answers: Vec<_> = answers
                .into_iter()
                .map(|a| a.map(str::to_owned).map_err(OracleError::new))
                .collect();
            answers.reverse();
            Self {
                answers: Mutex::new(answers),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl ContentMergeOracle for Scripted {
        fn merge(&self, request: &OracleRequest<'_>) -> Result<String, OracleError> {
            self.seen
                .lock()
                .unwrap()
                .push((request.attempt, request.feedback.map(str::to_owned)));
            self.answers
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(OracleError::new("script exhausted")))
        }
    }

    /// Accepts content containing "ok".
    struct WantsOk;

    impl SyntaxValidator for WantsOk {
        fn name(&self) -> &str {
            "wants-ok"
        }

        fn validate(&self, _path: &Path, content: &str) -> Validation {
            if content.contains("ok") {
                Validation::Valid
            } else {
                Validation::invalid(format!("no ok in {content:?}"))
            }
        }
    }

    fn conflicting() -> MergeTask {
        MergeTask::new(
            "a.txt",
            Some(b"1\n".to_vec()),
            Some(b"1\nbase\n".to_vec()),
            Some(b"1\ntask\n".to_vec()),
        )
        .unwrap()
    }

    fn validators() -> ValidatorSet {
        ValidatorSet::none()
            .with_rule("*.txt", Box::new(WantsOk))
            .unwrap()
    }

    #[test]
    fn clean_merge_is_mechanical_and_skips_oracle() {
        let (_dir, git) = repo();
        let oracle = Scripted::new(vec![]);
        let validators = validators();
        let exec = MergeExecutor::new(&git, &git, &oracle, &validators, 2);
        let task = MergeTask::new(
            "a.txt",
            Some(b"a\nb\nc\n".to_vec()),
            Some(b"A\nb\nc\n".to_vec()),
            Some(b"a\nb\nC\n".to_vec()),
        )
        .unwrap();
        let r = exec.resolve(&task).unwrap();
        assert_eq!(r.content, b"A\nb\nC\n");
        assert_eq!(r.method, ResolutionMethod::Mechanical);
        assert!(oracle.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn validation_feedback_drives_retry() {
        let (_dir, git) = repo();
        let oracle = Scripted::new(vec![Ok("bad"), Ok("1\nok\n")]);
        let validators = validators();
        let exec = MergeExecutor::new(&git, &git, &oracle, &validators, 2);
        let r = exec.resolve(&conflicting()).unwrap();
        assert_eq!(r.content, b"1\nok\n");
        assert_eq!(r.method, ResolutionMethod::Oracle { attempts: 2 });
        assert_eq!(
            *oracle.seen.lock().unwrap(),
            vec![(1, None), (2, Some("no ok in \"bad\"".to_owned()))]
        );
    }

    #[test]
    fn validation_exhaustion_reports_last_error() {
        let (_dir, git) = repo();
        let oracle = Scripted::new(vec![Ok("x"), Ok("y"), Ok("z"), Ok("ok")]);
        let validators = validators();
        let exec = MergeExecutor::new(&git, &git, &oracle, &validators, 2);
        let err = exec.resolve(&conflicting()).unwrap_err();
        assert_eq!(
            err,
            FailureReason::ValidationExhausted {
                message: "no ok in \"z\"".to_owned(),
                attempts: 3
            }
        );
        assert_eq!(oracle.seen.lock().unwrap().len(), 3);
    }

    #[test]
    fn oracle_errors_are_retried_then_reported() {
        let (_dir, git) = repo();
        let oracle = Scripted::new(vec![Err("busy"), Err("still busy")]);
        let validators = ValidatorSet::none();
        let exec = MergeExecutor::new(&git, &git, &oracle, &validators, 1);
        let err = exec.resolve(&conflicting()).unwrap_err();
        assert_eq!(
            err,
            FailureReason::OracleFailed {
                message: "still busy".to_owned(),
                attempts: 2
            }
        );
    }

    #[test]
    fn permanent_oracle_error_is_not_retried() {
        let (_dir, git) = repo();
        let oracle = NoOracle;
        let validators = ValidatorSet::none();
        let exec = MergeExecutor::new(&git, &git, &oracle, &validators, 2);
        let err = exec.resolve(&conflicting()).unwrap_err();
        match err {
            FailureReason::OracleFailed { message, attempts } => {
                assert!(message.contains("no merge oracle"), "{message}");
                assert_eq!(attempts, 1);
            }
            other => panic!("expected OracleFailed, got {other:?}"),
        }
    }

    #[test]
    fn binary_conflict_never_reaches_oracle() {
        let (_dir, git) = repo();
        let oracle = Scripted::new(vec![Ok("never")]);
        let validators = ValidatorSet::none();
        let exec = MergeExecutor::new(&git, &git, &oracle, &validators, 2);
        let task = MergeTask::new(
            "img.bin",
            Some(vec![0xff, 0x00, 0x01]),
            Some(vec![0xff, 0x00, 0x02]),
            Some(vec![0xff, 0x00, 0x03]),
        )
        .unwrap();
        assert_eq!(exec.resolve(&task).unwrap_err(), FailureReason::BinaryContent);
        assert!(oracle.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn execute_writes_and_stages() {
        let (dir, git) = repo();
        let oracle = Scripted::new(vec![Ok("1\nok\n")]);
        let validators = validators();
        let exec = MergeExecutor::new(&git, &git, &oracle, &validators, 2);
        let outcome = exec.execute(&conflicting());
        assert!(outcome.is_resolved(), "{outcome:?}");
        assert_eq!(fs::read_to_string(dir.path().join("a.txt")).unwrap(), "1\nok\n");

        let staged = std::process::Command::new("git")
            .args(["diff", "--cached", "--name-only"])
            .current_dir(dir.path())
            .output()
            .unwrap();
        assert_eq!(String::from_utf8_lossy(&staged.stdout).trim(), "a.txt");
    }

    #[test]
    fn failed_resolution_leaves_file_untouched() {
        let (dir, git) = repo();
        fs::write(dir.path().join("a.txt"), "original\n").unwrap();
        let oracle = Scripted::new(vec![]);
        let validators = ValidatorSet::none();
        let exec = MergeExecutor::new(&git, &git, &oracle, &validators, 0);
        let outcome = exec.execute(&conflicting());
        assert!(matches!(
            outcome,
            MergeOutcome::Failed { reason: FailureReason::OracleFailed { attempts: 1, .. }, .. }
        ));
        assert_eq!(fs::read_to_string(dir.path().join("a.txt")).unwrap(), "original\n");
    }

    #[cfg(unix)]
    #[test]
    fn write_keeps_executable_bit() {
        use std::os::unix::fs::PermissionsExt as _;

        let (dir, git) = repo();
        let path = dir.path().join("run.sh");
        fs::write(&path, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        let oracle = Scripted::new(vec![]);
        let validators = ValidatorSet::none();
        let exec = MergeExecutor::new(&git, &git, &oracle, &validators, 0);
        exec.write_file(Path::new("run.sh"), b"#!/bin/sh\necho hi\n").unwrap();
        assert_eq!(fs::metadata(&path).unwrap().permissions().mode() & 0o777, 0o755);
    }

    #[test]
    fn remove_missing_file_is_ok() {
        let (_dir, git) = repo();
        let oracle = Scripted::new(vec![]);
        let validators = ValidatorSet::none();
        let exec = MergeExecutor::new(&git, &git, &oracle, &validators, 0);
        exec.remove_file(Path::new("gone.txt")).unwrap();
    }
}
