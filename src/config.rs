//! Repository configuration (`.taskmerge/config.toml`).
//!
//! Defines the typed configuration for the merge engine: base branch and
//! worktree location, lock timings, merge concurrency and retry limits,
//! package-manager lock-file patterns, the content-merge oracle command,
//! and per-glob syntax validators.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::lock::LockSettings;

/// Location of the config file relative to the repository root.
pub const CONFIG_PATH: &str = ".taskmerge/config.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level taskmerge configuration.
///
/// Missing fields use defaults. Missing file → all defaults (no error).
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskmergeConfig {
    /// Repository-level settings.
    #[serde(default)]
    pub repo: RepoConfig,

    /// Lock timing settings.
    #[serde(default)]
    pub lock: LockConfig,

    /// Merge behaviour settings.
    #[serde(default)]
    pub merge: MergeConfig,

    /// Content-merge oracle settings.
    #[serde(default)]
    pub oracle: OracleConfig,

    /// Command-backed syntax validators, checked before the built-ins.
    #[serde(default)]
    pub validators: Vec<ValidatorConfig>,
}

// ---------------------------------------------------------------------------
// RepoConfig
// ---------------------------------------------------------------------------

/// Repository-level settings.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepoConfig {
    /// The branch tasks merge into by default (default: `"main"`).
    #[serde(default = "default_base_branch")]
    pub base_branch: String,

    /// Where task worktrees live, relative to the repository root.
    #[serde(default = "default_worktree_dir")]
    pub worktree_dir: PathBuf,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            base_branch: default_base_branch(),
            worktree_dir: default_worktree_dir(),
        }
    }
}

fn default_base_branch() -> String {
    "main".to_owned()
}

fn default_worktree_dir() -> PathBuf {
    PathBuf::from(".taskmerge/worktrees")
}

// ---------------------------------------------------------------------------
// LockConfig
// ---------------------------------------------------------------------------

/// Lock timings for the per-task lock and the task-numbering lock.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LockConfig {
    /// How long a merge waits for its task lock.
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,

    /// Polling interval while waiting for a task lock.
    #[serde(default = "default_task_poll_interval_ms")]
    pub task_poll_interval_ms: u64,

    /// How long task creation waits for the numbering lock.
    #[serde(default = "default_numbering_timeout_secs")]
    pub numbering_timeout_secs: u64,

    /// Polling interval while waiting for the numbering lock.
    #[serde(default = "default_numbering_poll_interval_ms")]
    pub numbering_poll_interval_ms: u64,

    /// Markers older than this are stale regardless of holder liveness.
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            task_timeout_secs: default_task_timeout_secs(),
            task_poll_interval_ms: default_task_poll_interval_ms(),
            numbering_timeout_secs: default_numbering_timeout_secs(),
            numbering_poll_interval_ms: default_numbering_poll_interval_ms(),
            max_age_secs: default_max_age_secs(),
        }
    }
}

impl LockConfig {
    /// Settings for the per-task merge lock.
    #[must_use]
    pub const fn task_settings(&self) -> LockSettings {
        LockSettings {
            timeout: Duration::from_secs(self.task_timeout_secs),
            poll_interval: Duration::from_millis(self.task_poll_interval_ms),
            max_age: Duration::from_secs(self.max_age_secs),
        }
    }

    /// Settings for the global task-numbering lock.
    #[must_use]
    pub const fn numbering_settings(&self) -> LockSettings {
        LockSettings {
            timeout: Duration::from_secs(self.numbering_timeout_secs),
            poll_interval: Duration::from_millis(self.numbering_poll_interval_ms),
            max_age: Duration::from_secs(self.max_age_secs),
        }
    }
}

const fn default_task_timeout_secs() -> u64 {
    30
}

const fn default_task_poll_interval_ms() -> u64 {
    100
}

const fn default_numbering_timeout_secs() -> u64 {
    5
}

const fn default_numbering_poll_interval_ms() -> u64 {
    10
}

const fn default_max_age_secs() -> u64 {
    300
}

// ---------------------------------------------------------------------------
// MergeConfig
// ---------------------------------------------------------------------------

/// Merge behaviour settings.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MergeConfig {
    /// Maximum needs-merge files resolved at once (bounds oracle load).
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Extra oracle attempts after the first one fails or yields content the
    /// validator rejects.
    #[serde(default = "default_validation_retries")]
    pub validation_retries: u32,

    /// Package-manager lock files: never merged, base version always wins.
    ///
    /// Globs without `/` match the file name; globs with `/` match the full
    /// repository-relative path.
    #[serde(default = "default_lockfile_patterns")]
    pub lockfile_patterns: Vec<String>,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            validation_retries: default_validation_retries(),
            lockfile_patterns: default_lockfile_patterns(),
        }
    }
}

impl MergeConfig {
    /// Compile [`lockfile_patterns`](Self::lockfile_patterns).
    pub fn lockfile_globs(&self) -> Result<Vec<PathGlob>, String> {
        self.lockfile_patterns
            .iter()
            .map(|p| PathGlob::new(p).map_err(|e| format!("{p:?}: {e}")))
            .collect()
    }
}

const fn default_max_concurrency() -> usize {
    5
}

const fn default_validation_retries() -> u32 {
    2
}

fn default_lockfile_patterns() -> Vec<String> {
    [
        "package-lock.json",
        "npm-shrinkwrap.json",
        "yarn.lock",
        "pnpm-lock.yaml",
        "bun.lockb",
        "Cargo.lock",
        "poetry.lock",
        "Pipfile.lock",
        "uv.lock",
        "Gemfile.lock",
        "composer.lock",
        "go.sum",
    ]
    .iter()
    .map(|s| (*s).to_owned())
    .collect()
}

// ---------------------------------------------------------------------------
// OracleConfig
// ---------------------------------------------------------------------------

/// External content-merge oracle.
///
/// ```toml
/// [oracle]
/// command = "merge-bot --stdin"
/// timeout_secs = 300
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OracleConfig {
    /// Shell command run via `sh -c`. `None` means conflicts cannot be
    /// resolved automatically and are reported as failures.
    pub command: Option<String>,

    /// Per-call timeout.
    #[serde(default = "default_oracle_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            command: None,
            timeout_secs: default_oracle_timeout_secs(),
        }
    }
}

const fn default_oracle_timeout_secs() -> u64 {
    300
}

// ---------------------------------------------------------------------------
// ValidatorConfig
// ---------------------------------------------------------------------------

/// A command-backed syntax validator for files matching a glob.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidatorConfig {
    /// Glob pattern for matching file paths (e.g. `"*.yaml"`).
    #[serde(rename = "match")]
    pub match_glob: String,

    /// Shell command; receives the candidate content on stdin, exit 0 = valid.
    pub command: String,

    /// Per-invocation timeout.
    #[serde(default = "default_validator_timeout_secs")]
    pub timeout_secs: u64,
}

const fn default_validator_timeout_secs() -> u64 {
    30
}

// ---------------------------------------------------------------------------
// PathGlob
// ---------------------------------------------------------------------------

/// A configured path pattern.
///
/// A pattern without `/` matches the file name at any depth
/// (`"Cargo.lock"` matches `crates/x/Cargo.lock`). A pattern with `/`
/// matches the whole repository-relative path, and `*` does not cross
/// directory separators.
#[derive(Clone, Debug)]
pub struct PathGlob {
    pattern: glob::Pattern,
    full_path: bool,
}

impl PathGlob {
    /// Compile `pattern`.
    pub fn new(pattern: &str) -> Result<Self, glob::PatternError> {
        Ok(Self {
            pattern: glob::Pattern::new(pattern)?,
            full_path: pattern.contains('/'),
        })
    }

    /// The source pattern.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.pattern.as_str()
    }

    /// Does `path` match?
    #[must_use]
    pub fn matches(&self, path: &Path) -> bool {
        if self.full_path {
            let opts = glob::MatchOptions {
                require_literal_separator: true,
                ..glob::MatchOptions::new()
            };
            self.pattern.matches_path_with(path, opts)
        } else {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| self.pattern.matches(n))
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Error loading a taskmerge configuration file.
#[derive(Debug)]
pub struct ConfigError {
    /// The path that was being loaded (if available).
    pub path: Option<PathBuf>,
    /// Human-readable message with line-level detail when possible.
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(p) = &self.path {
            write!(f, "{}: {}", p.display(), self.message)
        } else {
            write!(f, "config error: {}", self.message)
        }
    }
}

impl std::error::Error for ConfigError {}

impl TaskmergeConfig {
    /// Load `.taskmerge/config.toml` under a repository root.
    ///
    /// # Errors
    /// See [`TaskmergeConfig::load`].
    pub fn load_from_repo(repo_root: &Path) -> Result<Self, ConfigError> {
        Self::load(&repo_root.join(CONFIG_PATH))
    }

    /// Load configuration from a TOML file.
    ///
    /// - If the file does not exist, returns all defaults (not an error).
    /// - If the file exists but contains invalid TOML or unknown fields,
    ///   returns a [`ConfigError`] with line-level detail.
    ///
    /// # Errors
    /// Returns `ConfigError` on I/O errors (other than not-found) or parse errors.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError {
                    path: Some(path.to_owned()),
                    message: format!("could not read file: {e}"),
                });
            }
        };
        Self::parse(&contents).map_err(|mut e| {
            e.path = Some(path.to_owned());
            e
        })
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `ConfigError` on invalid TOML, unknown fields, or values that
    /// parse but cannot work (zero concurrency, invalid globs).
    pub fn parse(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml_str).map_err(|e| {
            let mut message = e.message().to_owned();
            if let Some(span) = e.span() {
                let line = toml_str[..span.start]
                    .chars()
                    .filter(|&c| c == '\n')
                    .count()
                    + 1;
                message = format!("line {line}: {message}");
            }
            ConfigError {
                path: None,
                message,
            }
        })?;
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError {
            path: None,
            message,
        };
        if self.merge.max_concurrency == 0 {
            return Err(invalid("merge.max_concurrency must be at least 1".to_owned()));
        }
        self.merge
            .lockfile_globs()
            .map_err(|e| invalid(format!("merge.lockfile_patterns: {e}")))?;
        for v in &self.validators {
            PathGlob::new(&v.match_glob)
                .map_err(|e| invalid(format!("validators: {:?}: {e}", v.match_glob)))?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
