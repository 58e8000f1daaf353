//! Shared test helpers for taskmerge integration tests.
//!
//! All tests use temp directories, never the real repo. Each test gets its
//! own git repository on `main` via [`TestRepo::new`].

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tempfile::TempDir;

use taskmerge::lock::{LockManager, LockSettings};
use taskmerge::merge::{MergeOptions, MergeOrchestrator, MergeRun};
use taskmerge::oracle::{ContentMergeOracle, OracleError, OracleRequest};
use taskmerge::validate::ValidatorSet;
use taskmerge::MergeError;
use taskmerge_git::GitCli;

// ---------------------------------------------------------------------------
// Repositories
// ---------------------------------------------------------------------------

/// A throwaway repository with `main` checked out.
pub struct TestRepo {
    pub dir: TempDir,
    pub git: GitCli,
    pub locks: LockManager,
}

impl TestRepo {
    /// A repo on `main` with one commit holding `files`.
    pub fn new(files: &[(&str, &str)]) -> Self {
        Self::init(&["init", "--quiet"], files)
    }

    /// Like [`TestRepo::new`], but with SHA-256 object names.
    pub fn sha256(files: &[(&str, &str)]) -> Self {
        Self::init(&["init", "--quiet", "--object-format=sha256"], files)
    }

    fn init(init: &[&str], files: &[(&str, &str)]) -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        let root = dir.path();
        git(root, init);
        git(root, &["symbolic-ref", "HEAD", "refs/heads/main"]);
        git(root, &["config", "user.name", "Test"]);
        git(root, &["config", "user.email", "test@test.com"]);
        git(root, &["config", "commit.gpgsign", "false"]);
        write(root, "README.md", "# test repo\n");
        for (path, content) in files {
            write(root, path, content);
        }
        commit_all(root, "initial");

        let git = GitCli::open(root).expect("failed to open test repo");
        let locks = LockManager::new(root.join(".git").join("taskmerge").join("locks"));
        Self { dir, git, locks }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn git(&self, args: &[&str]) -> String {
        git(self.root(), args)
    }

    pub fn write(&self, rel: &str, content: &str) {
        write(self.root(), rel, content);
    }

    pub fn read(&self, rel: &str) -> Option<String> {
        std::fs::read_to_string(self.root().join(rel)).ok()
    }

    pub fn commit_all(&self, msg: &str) {
        commit_all(self.root(), msg);
    }

    /// Fork `task/<name>` from `main`, run `task_edit` there and commit,
    /// then run `main_edit` on `main` and commit. Leaves `main` checked out.
    pub fn diverge(&self, name: &str, task_edit: impl Fn(&Self), main_edit: impl Fn(&Self)) {
        self.git(&["checkout", "--quiet", "-b", &format!("task/{name}")]);
        task_edit(self);
        self.commit_all("task change");
        self.git(&["checkout", "--quiet", "main"]);
        main_edit(self);
        self.commit_all("main change");
    }

    /// Paths staged relative to HEAD, sorted.
    pub fn staged(&self) -> Vec<String> {
        let out = self.git(&["diff", "--cached", "--name-only"]);
        let mut paths: Vec<String> = out.lines().map(str::to_owned).collect();
        paths.sort();
        paths
    }

    /// `git status --porcelain`, ignoring nothing.
    pub fn status(&self) -> String {
        self.git(&["status", "--porcelain"])
    }

    /// Run a merge of `task` into `main` with test-friendly options.
    pub fn merge(
        &self,
        task: &str,
        oracle: &dyn ContentMergeOracle,
        validators: &ValidatorSet,
    ) -> Result<MergeRun, MergeError> {
        self.merge_with(task, oracle, validators, options())
    }

    pub fn merge_with(
        &self,
        task: &str,
        oracle: &dyn ContentMergeOracle,
        validators: &ValidatorSet,
        options: MergeOptions,
    ) -> Result<MergeRun, MergeError> {
        MergeOrchestrator::new(&self.git, &self.locks, oracle, validators, options)
            .merge_task(task, "main")
    }
}

/// Default options with a short lock timeout.
pub fn options() -> MergeOptions {
    MergeOptions {
        lock: LockSettings {
            timeout: Duration::from_millis(300),
            poll_interval: Duration::from_millis(20),
            max_age: Duration::from_secs(300),
        },
        ..MergeOptions::default()
    }
}

pub fn git(root: &Path, args: &[&str]) -> String {
    let out = Command::new("git")
        .args(args)
        .current_dir(root)
        .output()
        .unwrap_or_else(|e| panic!("failed to spawn git {}: {e}", args.join(" ")));
    assert!(
        out.status.success(),
        "git {} failed:\nstdout: {}\nstderr: {}",
        args.join(" "),
        String::from_utf8_lossy(&out.stdout),
        String::from_utf8_lossy(&out.stderr),
    );
    String::from_utf8_lossy(&out.stdout).trim().to_owned()
}

pub fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

pub fn commit_all(root: &Path, msg: &str) {
    git(root, &["add", "-A"]);
    git(root, &["commit", "--quiet", "-m", msg]);
}

// ---------------------------------------------------------------------------
// Oracles
// ---------------------------------------------------------------------------

/// One recorded oracle call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OracleCall {
    pub path: PathBuf,
    pub ancestor: Option<String>,
    pub ours: String,
    pub theirs: String,
    pub attempt: u32,
    pub feedback: Option<String>,
}

/// Records every call, tracks peak concurrency, and answers with `answer`.
pub struct Recording<F> {
    answer: F,
    pub calls: Mutex<Vec<OracleCall>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    delay: Duration,
}

impl<F> Recording<F>
where
    F: Fn(&OracleRequest<'_>) -> Result<String, OracleError> + Send + Sync,
{
    pub fn new(answer: F) -> Self {
        Self {
            answer,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    /// Hold every call for `delay` before answering.
    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<OracleCall> {
        let mut calls = self.calls.lock().unwrap().clone();
        calls.sort_by(|a, b| (&a.path, a.attempt).cmp(&(&b.path, b.attempt)));
        calls
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl<F> ContentMergeOracle for Recording<F>
where
    F: Fn(&OracleRequest<'_>) -> Result<String, OracleError> + Send + Sync,
{
    fn merge(&self, request: &OracleRequest<'_>) -> Result<String, OracleError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.calls.lock().unwrap().push(OracleCall {
            path: request.path.to_path_buf(),
            ancestor: request.ancestor.map(str::to_owned),
            ours: request.ours.to_owned(),
            theirs: request.theirs.to_owned(),
            attempt: request.attempt,
            feedback: request.feedback.map(str::to_owned),
        });
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        let answer = (self.answer)(request);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        answer
    }
}

/// An oracle that joins both sides, ours first.
pub fn concatenating() -> Recording<impl Fn(&OracleRequest<'_>) -> Result<String, OracleError> + Send + Sync>
{
    Recording::new(|r| Ok(format!("{}\n{}\n", r.ours, r.theirs)))
}

/// Like [`concatenating`], but fails for every path in `failing`.
pub fn failing_on(
    failing: &'static [&'static str],
) -> Recording<impl Fn(&OracleRequest<'_>) -> Result<String, OracleError> + Send + Sync> {
    Recording::new(move |r| {
        if failing.iter().any(|p| Path::new(p) == r.path) {
            Err(OracleError::new(format!("refusing {}", r.path.display())))
        } else {
            Ok(format!("{}\n{}\n", r.ours, r.theirs))
        }
    })
}
