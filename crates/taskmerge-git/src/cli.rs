//! [`GitCli`] — the `git` subprocess implementation of [`GitQuery`] and
//! [`GitWorktree`].
//!
//! Every invocation runs in the repository root with `core.quotePath=false`
//! and, where git supports it, `-z` output so paths survive verbatim.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::Mutex;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::GitError;
use crate::parse;
use crate::query::GitQuery;
use crate::types::{ConflictCheck, ConflictSource, DiffEntry, GitOid, RenamePair};
use crate::worktree::GitWorktree;

/// How many times staging retries when another git process holds
/// `index.lock`.
const INDEX_LOCK_RETRIES: u32 = 20;

/// Pause between index-lock retries.
const INDEX_LOCK_BACKOFF: Duration = Duration::from_millis(50);

/// A git repository driven through the `git` binary.
#[derive(Debug)]
pub struct GitCli {
    root: PathBuf,
    /// Serialises index writes from this process; git itself rejects
    /// concurrent writers with `index.lock` errors.
    index: Mutex<()>,
}

impl GitCli {
    /// Open the repository whose working tree contains `path`.
    ///
    /// # Errors
    /// Returns [`GitError::NotARepository`] if `path` is not inside a git
    /// working tree.
    pub fn open(path: &Path) -> Result<Self, GitError> {
        let output = Command::new("git")
            .args(["rev-parse", "--show-toplevel"])
            .current_dir(path)
            .output()?;
        if !output.status.success() {
            return Err(GitError::NotARepository {
                path: path.to_path_buf(),
            });
        }
        let top = String::from_utf8_lossy(&output.stdout).trim().to_owned();
        Ok(Self {
            root: PathBuf::from(top),
            index: Mutex::new(()),
        })
    }

    /// Build a `git` command rooted at the repository.
    fn command<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new("git");
        cmd.args(["-c", "core.quotePath=false"])
            .args(args)
            .current_dir(&self.root);
        cmd
    }

    /// Run a command and return its raw output regardless of exit status.
    fn output(&self, mut cmd: Command) -> Result<Output, GitError> {
        debug!(command = %describe(&cmd), "git");
        Ok(cmd.output()?)
    }

    /// Run a command and require a zero exit status.
    fn run(&self, cmd: Command) -> Result<Vec<u8>, GitError> {
        let summary = describe(&cmd);
        let output = self.output(cmd)?;
        if output.status.success() {
            Ok(output.stdout)
        } else {
            Err(command_failed(summary, &output))
        }
    }

    /// Run a staging command, retrying while another process holds the index.
    fn run_index_write(&self, args: &[&OsStr]) -> Result<(), GitError> {
        let _guard = self
            .index
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut attempt = 0;
        loop {
            let cmd = self.command(args);
            let summary = describe(&cmd);
            let output = self.output(cmd)?;
            if output.status.success() {
                return Ok(());
            }
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("index.lock") && attempt < INDEX_LOCK_RETRIES {
                attempt += 1;
                std::thread::sleep(INDEX_LOCK_BACKOFF);
                continue;
            }
            return Err(command_failed(summary, &output));
        }
    }

    /// The fallback conflict check: paths changed on both sides since their
    /// merge-base.
    ///
    /// This over-reports compared to a real three-way merge (two sides
    /// editing different hunks of one file do not conflict). Used by
    /// [`dry_run_conflict_check`](GitQuery::dry_run_conflict_check) when
    /// merge-tree cannot report paths.
    ///
    /// # Errors
    /// Returns an error if either diff fails.
    pub fn both_sides_changed(&self, base: &str, task: &str) -> Result<ConflictCheck, GitError> {
        let paths = |from: &str, to: &str| -> Result<Vec<PathBuf>, GitError> {
            Ok(self
                .changed_files(from, to)?
                .into_iter()
                .map(|e| e.path)
                .collect())
        };
        Ok(ConflictCheck::both_sides_changed(
            paths(task, base)?,
            paths(base, task)?,
        ))
    }
}

impl GitQuery for GitCli {
    fn root(&self) -> &Path {
        &self.root
    }

    fn common_dir(&self) -> Result<PathBuf, GitError> {
        let out = self.run(self.command(["rev-parse", "--git-common-dir"]))?;
        let dir = PathBuf::from(String::from_utf8_lossy(&out).trim());
        Ok(if dir.is_absolute() {
            dir
        } else {
            self.root.join(dir)
        })
    }

    fn current_branch(&self) -> Result<Option<String>, GitError> {
        let cmd = self.command(["symbolic-ref", "--quiet", "--short", "HEAD"]);
        let summary = describe(&cmd);
        let output = self.output(cmd)?;
        match output.status.code() {
            Some(0) => Ok(Some(
                String::from_utf8_lossy(&output.stdout).trim().to_owned(),
            )),
            // Detached HEAD.
            Some(1) => Ok(None),
            _ => Err(command_failed(summary, &output)),
        }
    }

    fn rev_parse(&self, spec: &str) -> Result<GitOid, GitError> {
        self.rev_parse_opt(spec)?.ok_or_else(|| GitError::NotFound {
            message: format!("revision `{spec}` does not name a commit"),
        })
    }

    fn rev_parse_opt(&self, spec: &str) -> Result<Option<GitOid>, GitError> {
        let target = format!("{spec}^{{commit}}");
        let cmd = self.command(["rev-parse", "--verify", "--quiet", target.as_str()]);
        let summary = describe(&cmd);
        let output = self.output(cmd)?;
        match output.status.code() {
            Some(0) => parse_oid(&output.stdout).map(Some),
            Some(1) => Ok(None),
            _ => Err(command_failed(summary, &output)),
        }
    }

    fn merge_base(&self, a: &str, b: &str) -> Result<Option<GitOid>, GitError> {
        let cmd = self.command(["merge-base", a, b]);
        let summary = describe(&cmd);
        let output = self.output(cmd)?;
        match output.status.code() {
            Some(0) => parse_oid(&output.stdout).map(Some),
            // Exit 1 with empty output: no common ancestor.
            Some(1) if output.stderr.is_empty() => Ok(None),
            _ => Err(command_failed(summary, &output)),
        }
    }

    fn changed_files(&self, base: &str, head: &str) -> Result<Vec<DiffEntry>, GitError> {
        let range = format!("{base}...{head}");
        let cmd = self.command([
            "diff",
            "--name-status",
            "-z",
            "--no-renames",
            "--no-ext-diff",
            range.as_str(),
            "--",
        ]);
        let summary = describe(&cmd);
        let out = self.run(cmd)?;
        parse::parse_name_status(&out).map_err(|message| GitError::Parse {
            command: summary,
            message,
        })
    }

    fn content_at(&self, rev: &str, path: &Path) -> Result<Option<Vec<u8>>, GitError> {
        let mut cmd = self.command(["ls-tree", "-z", "--full-tree", rev, "--"]);
        cmd.arg(path);
        let summary = describe(&cmd);
        let out = self.run(cmd)?;
        let entry = parse::parse_ls_tree(&out).map_err(|message| GitError::Parse {
            command: summary,
            message,
        })?;
        match entry {
            Some(entry) if entry.kind == "blob" => {
                let oid = entry.oid.to_string();
                self.run(self.command(["cat-file", "blob", oid.as_str()]))
                    .map(Some)
            }
            _ => Ok(None),
        }
    }

    fn detect_renames(&self, from: &str, to: &str) -> Result<Vec<RenamePair>, GitError> {
        let range = format!("{from}..{to}");
        let cmd = self.command([
            "log",
            "--reverse",
            "--format=",
            "--name-status",
            "-M",
            "--diff-filter=R",
            "-z",
            range.as_str(),
        ]);
        let summary = describe(&cmd);
        let out = self.run(cmd)?;
        parse::parse_rename_log(&out).map_err(|message| GitError::Parse {
            command: summary,
            message,
        })
    }

    fn dry_run_conflict_check(&self, base: &str, task: &str) -> Result<ConflictCheck, GitError> {
        // merge-tree --write-tree only writes objects to the object store;
        // HEAD, the index, and the working tree are untouched.
        let cmd = self.command([
            "merge-tree",
            "--write-tree",
            "--name-only",
            "--no-messages",
            "-z",
            base,
            task,
        ]);
        let output = self.output(cmd)?;
        let parsed = parse::parse_merge_tree(&output.stdout);

        match (output.status.code(), parsed) {
            (Some(0), Some(_)) => return Ok(ConflictCheck::clean()),
            (Some(1), Some((_, paths))) if !paths.is_empty() => {
                return Ok(ConflictCheck {
                    has_conflicts: true,
                    conflicting_files: paths,
                    source: ConflictSource::MergeTree,
                });
            }
            (code, _) => {
                warn!(
                    exit_code = ?code,
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "merge-tree gave no usable conflict list; falling back to both-sides-changed"
                );
            }
        }

        self.both_sides_changed(base, task)
    }

    fn merge_file(
        &self,
        base: &[u8],
        ours: &[u8],
        theirs: &[u8],
    ) -> Result<Option<Vec<u8>>, GitError> {
        let dir = tempfile::tempdir()?;
        let ours_path = dir.path().join("ours");
        let base_path = dir.path().join("base");
        let theirs_path = dir.path().join("theirs");
        std::fs::write(&ours_path, ours)?;
        std::fs::write(&base_path, base)?;
        std::fs::write(&theirs_path, theirs)?;

        let mut cmd = Command::new("git");
        cmd.args(["merge-file", "-p", "--quiet"])
            .arg(&ours_path)
            .arg(&base_path)
            .arg(&theirs_path);
        let output = self.output(cmd)?;

        // Exit status is the number of conflicts (capped at 127); negative
        // values (255 on unix) signal errors.
        match output.status.code() {
            Some(0) => Ok(Some(output.stdout)),
            Some(1..=127) => Ok(None),
            _ => Err(command_failed(
                "git merge-file -p <ours> <base> <theirs>".to_owned(),
                &output,
            )),
        }
    }

    fn list_branches(&self, prefix: &str) -> Result<Vec<String>, GitError> {
        let pattern = format!("refs/heads/{prefix}");
        let out = self.run(self.command([
            "for-each-ref",
            "--format=%(refname:short)",
            pattern.as_str(),
        ]))?;
        let mut names: Vec<String> = String::from_utf8_lossy(&out)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && l.starts_with(prefix))
            .map(ToOwned::to_owned)
            .collect();
        names.sort();
        Ok(names)
    }
}

impl GitWorktree for GitCli {
    fn stage_path(&self, path: &Path) -> Result<(), GitError> {
        self.run_index_write(&[
            OsStr::new("add"),
            OsStr::new("--"),
            path.as_os_str(),
        ])
    }

    fn stage_removal(&self, path: &Path) -> Result<(), GitError> {
        self.run_index_write(&[
            OsStr::new("rm"),
            OsStr::new("--cached"),
            OsStr::new("--ignore-unmatch"),
            OsStr::new("--quiet"),
            OsStr::new("--"),
            path.as_os_str(),
        ])
    }

    fn create_branch(&self, name: &str, start_point: &str) -> Result<(), GitError> {
        self.run(self.command(["branch", name, start_point]))
            .map(drop)
    }

    fn delete_branch(&self, name: &str) -> Result<(), GitError> {
        self.run(self.command(["branch", "-D", name])).map(drop)
    }

    fn add_worktree(&self, path: &Path, branch: &str) -> Result<(), GitError> {
        let mut cmd = self.command(["worktree", "add"]);
        cmd.arg(path).arg(branch);
        self.run(cmd).map(drop)
    }

    fn remove_worktree(&self, path: &Path) -> Result<(), GitError> {
        let mut cmd = self.command(["worktree", "remove", "--force"]);
        cmd.arg(path);
        self.run(cmd).map(drop)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn describe(cmd: &Command) -> String {
    let mut parts = vec![cmd.get_program().to_string_lossy().into_owned()];
    parts.extend(
        cmd.get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .skip_while(|a| a == "-c" || a == "core.quotePath=false"),
    );
    parts.join(" ")
}

fn command_failed(command: String, output: &Output) -> GitError {
    GitError::CommandFailed {
        command,
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        exit_code: output.status.code(),
    }
}

fn parse_oid(stdout: &[u8]) -> Result<GitOid, GitError> {
    let raw = String::from_utf8_lossy(stdout).trim().to_owned();
    raw.parse().map_err(|e: crate::types::OidParseError| GitError::InvalidOid {
        value: e.value,
        reason: e.reason,
    })
}
