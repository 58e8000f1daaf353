//! Named, file-backed mutual exclusion.
//!
//! A lock is a marker file `<lock-dir>/<name>.lock` holding a JSON
//! [`LockMarker`] (holder pid, host, random token, acquisition time). The
//! marker is written to a temp file first and published with an atomic
//! no-clobber rename, so a waiter never observes a half-written marker and
//! at most one publisher wins.
//!
//! Waiters poll instead of blocking on an OS lock: holders may be separate
//! processes, possibly on other hosts sharing the directory. A marker is
//! stale when
//!
//! - its holder ran on this host and that pid is no longer running, or
//! - it is older than [`LockSettings::max_age`], whatever the host.
//!
//! Stale markers are reclaimed by whichever waiter notices first, and the
//! waiter retries immediately.
//!
//! Publishing only ever creates a marker where none exists. Removing one
//! (release or reclamation) happens under a short-lived `<name>.reclaim`
//! marker, and the remover re-reads the marker while holding it. With
//! removals serialised and creation exclusive, a marker can only be removed
//! by the party that just verified it.
//!
//! The lock directory lives under the git common dir so every linked
//! worktree of a repository shares it.

use std::fmt;
use std::fs;
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use taskmerge_git::GitQuery;

// ---------------------------------------------------------------------------
// LockSettings
// ---------------------------------------------------------------------------

/// Timing for one kind of lock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LockSettings {
    /// Give up after waiting this long.
    pub timeout: Duration,
    /// Sleep between attempts while the holder is alive.
    pub poll_interval: Duration,
    /// Markers older than this are stale regardless of holder liveness.
    pub max_age: Duration,
}

impl LockSettings {
    /// Defaults for the per-task merge lock.
    #[must_use]
    pub const fn task() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(100),
            max_age: Duration::from_secs(300),
        }
    }

    /// Defaults for the task-numbering lock: held only for a quick
    /// scan-and-create, so it polls more tightly and gives up sooner.
    #[must_use]
    pub const fn numbering() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(10),
            max_age: Duration::from_secs(300),
        }
    }
}

// ---------------------------------------------------------------------------
// LockMarker
// ---------------------------------------------------------------------------

/// Contents of a lock marker file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockMarker {
    /// Lock name.
    pub name: String,
    /// Holder process id.
    pub pid: u32,
    /// Host the holder runs on.
    pub host: String,
    /// Random token identifying this acquisition.
    pub token: u64,
    /// Acquisition time, seconds since the Unix epoch.
    pub acquired_at: u64,
}

impl LockMarker {
    fn age(&self) -> Duration {
        Duration::from_secs(unix_now().saturating_sub(self.acquired_at))
    }
}

impl fmt::Display for LockMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pid {} on {} (held {}s)",
            self.pid,
            self.host,
            self.age().as_secs()
        )
    }
}

// ---------------------------------------------------------------------------
// LockError
// ---------------------------------------------------------------------------

/// Errors from acquiring or releasing a lock.
#[derive(Debug)]
pub enum LockError {
    /// The lock stayed held by a live holder for the whole timeout.
    Timeout {
        /// Lock name.
        name: String,
        /// How long we waited.
        waited: Duration,
        /// The holder seen on the last attempt, if its marker was readable.
        holder: Option<LockMarker>,
    },
    /// The lock name cannot be used as a file name.
    InvalidName {
        /// The rejected name.
        name: String,
    },
    /// Filesystem error on the lock directory or a marker.
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },
}

impl fmt::Display for LockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout {
                name,
                waited,
                holder,
            } => {
                write!(
                    f,
                    "timed out after {:.1}s waiting for lock '{name}'",
                    waited.as_secs_f64()
                )?;
                if let Some(h) = holder {
                    write!(f, " (held by {h})")?;
                }
                Ok(())
            }
            Self::InvalidName { name } => write!(
                f,
                "invalid lock name {name:?}: use letters, digits, '.', '_' and '-'"
            ),
            Self::Io { path, source } => write!(f, "lock I/O on {}: {source}", path.display()),
        }
    }
}

impl std::error::Error for LockError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        if let Self::Io { source, .. } = self {
            Some(source)
        } else {
            None
        }
    }
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> LockError + '_ {
    move |source| LockError::Io {
        path: path.to_path_buf(),
        source,
    }
}

// ---------------------------------------------------------------------------
// LockManager
// ---------------------------------------------------------------------------

/// Hands out named locks backed by marker files in one directory.
#[derive(Clone, Debug)]
pub struct LockManager {
    dir: PathBuf,
    host: String,
}

/// What a waiter found when the marker already existed.
enum Holder {
    /// Marker vanished between the failed publish and the read.
    Gone,
    /// Marker belongs to a holder we must wait for.
    Live(Option<LockMarker>),
    /// Marker may be reclaimed. Carries the raw bytes that were judged.
    Stale { raw: Vec<u8>, reason: String },
}

impl LockManager {
    /// A manager for locks in `dir` (created on first acquisition).
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            host: local_host(),
        }
    }

    /// The standard lock directory of a repository:
    /// `<git-common-dir>/taskmerge/locks`.
    ///
    /// # Errors
    /// Returns the git error message if the common dir cannot be resolved.
    pub fn for_repo(repo: &dyn GitQuery) -> Result<Self, taskmerge_git::GitError> {
        Ok(Self::new(repo.common_dir()?.join("taskmerge").join("locks")))
    }

    /// Directory holding the marker files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Host name recorded in markers this manager writes.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Path of the marker for `name`.
    #[must_use]
    pub fn marker_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.lock"))
    }

    /// Acquire `name`, waiting up to `settings.timeout`.
    ///
    /// Stale markers are reclaimed and retried immediately; live ones are
    /// polled every `settings.poll_interval`.
    ///
    /// # Errors
    /// [`LockError::Timeout`] if a live holder kept the lock for the whole
    /// timeout; [`LockError::InvalidName`] or [`LockError::Io`] otherwise.
    pub fn acquire(&self, name: &str, settings: &LockSettings) -> Result<LockGuard, LockError> {
        validate_name(name)?;
        fs::create_dir_all(&self.dir).map_err(io_err(&self.dir))?;

        let path = self.marker_path(name);
        let start = Instant::now();
        let mut last_holder = None;

        loop {
            if let Some(guard) = self.try_publish(name, &path)? {
                debug!(lock = name, waited_ms = start.elapsed().as_millis(), "lock acquired");
                return Ok(guard);
            }

            match self.inspect(&path, settings)? {
                Holder::Gone => continue,
                Holder::Stale { raw, reason } => {
                    if reclaim(&path, &raw)? {
                        info!(lock = name, %reason, "reclaimed stale lock");
                        continue;
                    }
                }
                Holder::Live(marker) => last_holder = marker,
            }

            let waited = start.elapsed();
            if waited >= settings.timeout {
                return Err(LockError::Timeout {
                    name: name.to_owned(),
                    waited,
                    holder: last_holder,
                });
            }
            std::thread::sleep(settings.poll_interval.min(settings.timeout - waited));
        }
    }

    /// Read the current holder of `name`, if any.
    ///
    /// # Errors
    /// Returns [`LockError::Io`] if the marker exists but cannot be read.
    pub fn holder(&self, name: &str) -> Result<Option<LockMarker>, LockError> {
        let path = self.marker_path(name);
        match fs::read(&path) {
            Ok(raw) => Ok(serde_json::from_slice(&raw).ok()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_err(&path)(e)),
        }
    }

    /// One atomic create-if-absent attempt.
    fn try_publish(&self, name: &str, path: &Path) -> Result<Option<LockGuard>, LockError> {
        let marker = LockMarker {
            name: name.to_owned(),
            pid: std::process::id(),
            host: self.host.clone(),
            token: rand::random(),
            acquired_at: unix_now(),
        };
        let body = serde_json::to_vec(&marker).map_err(|e| io_err(path)(e.into()))?;

        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir).map_err(io_err(&self.dir))?;
        tmp.write_all(&body).map_err(io_err(tmp.path()))?;
        tmp.as_file().sync_all().map_err(io_err(path))?;

        match tmp.persist_noclobber(path) {
            Ok(_) => Ok(Some(LockGuard {
                name: name.to_owned(),
                path: path.to_path_buf(),
                token: marker.token,
                released: false,
            })),
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(io_err(path)(e.error)),
        }
    }

    fn inspect(&self, path: &Path, settings: &LockSettings) -> Result<Holder, LockError> {
        let raw = match fs::read(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Holder::Gone),
            Err(e) => return Err(io_err(path)(e)),
        };

        let Ok(marker) = serde_json::from_slice::<LockMarker>(&raw) else {
            // Unreadable marker: only the age ceiling can free it.
            let age = fs::metadata(path)
                .and_then(|m| m.modified())
                .ok()
                .and_then(|t| t.elapsed().ok())
                .unwrap_or_default();
            if age >= settings.max_age {
                return Ok(Holder::Stale {
                    raw,
                    reason: format!("unreadable marker older than {}s", settings.max_age.as_secs()),
                });
            }
            return Ok(Holder::Live(None));
        };

        if marker.age() >= settings.max_age {
            let reason = format!(
                "held by {marker} past the {}s ceiling",
                settings.max_age.as_secs()
            );
            return Ok(Holder::Stale { raw, reason });
        }
        if marker.host == self.host && !pid_alive(marker.pid) {
            let reason = format!("holder pid {} is not running", marker.pid);
            return Ok(Holder::Stale { raw, reason });
        }
        Ok(Holder::Live(Some(marker)))
    }
}

/// Remove a stale marker, provided it is still the one we judged.
///
/// Returns `false` when the marker changed hands since it was judged.
fn reclaim(path: &Path, judged: &[u8]) -> Result<bool, LockError> {
    let _removal = RemovalGuard::acquire(path)?;
    match fs::read(path) {
        Ok(current) if current == judged => {}
        Ok(_) => {
            debug!(path = %path.display(), "lock changed hands before reclaim");
            return Ok(false);
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(io_err(path)(e)),
    }
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(true),
        Err(e) => Err(io_err(path)(e)),
    }
}

/// An abandoned `.reclaim` marker older than this is removed.
const REMOVAL_GUARD_MAX_AGE: Duration = Duration::from_secs(10);

const REMOVAL_GUARD_POLL: Duration = Duration::from_millis(2);

/// Exclusive right to remove one lock marker. Held for a read and an unlink.
struct RemovalGuard {
    path: PathBuf,
}

impl RemovalGuard {
    fn acquire(marker: &Path) -> Result<Self, LockError> {
        let path = marker.with_extension("reclaim");
        loop {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(_) => return Ok(Self { path }),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(io_err(&path)(e)),
            }

            let age = fs::metadata(&path)
                .and_then(|m| m.modified())
                .ok()
                .and_then(|t| t.elapsed().ok());
            if age.is_some_and(|a| a >= REMOVAL_GUARD_MAX_AGE) {
                warn!(path = %path.display(), "removing abandoned reclaim marker");
                match fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(io_err(&path)(e)),
                }
                continue;
            }
            std::thread::sleep(REMOVAL_GUARD_POLL);
        }
    }
}

impl Drop for RemovalGuard {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path)
            && e.kind() != io::ErrorKind::NotFound
        {
            warn!(path = %self.path.display(), error = %e, "failed to remove reclaim marker");
        }
    }
}

fn validate_name(name: &str) -> Result<(), LockError> {
    let ok = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if ok {
        Ok(())
    } else {
        Err(LockError::InvalidName {
            name: name.to_owned(),
        })
    }
}

// ---------------------------------------------------------------------------
// LockGuard
// ---------------------------------------------------------------------------

/// A held lock. Dropping the guard releases it, including during unwinding.
#[derive(Debug)]
pub struct LockGuard {
    name: String,
    path: PathBuf,
    token: u64,
    released: bool,
}

impl LockGuard {
    /// Lock name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Marker path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock. Idempotent.
    ///
    /// The marker is only removed if it still carries this guard's token; a
    /// marker reclaimed by someone else after the age ceiling is left alone.
    ///
    /// # Errors
    /// Returns [`LockError::Io`] if the marker exists but cannot be read or
    /// removed.
    pub fn release(&mut self) -> Result<(), LockError> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        let _removal = RemovalGuard::acquire(&self.path)?;
        let current = match fs::read(&self.path) {
            Ok(raw) => serde_json::from_slice::<LockMarker>(&raw).ok(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(lock = %self.name, "lock marker already gone at release");
                return Ok(());
            }
            Err(e) => return Err(io_err(&self.path)(e)),
        };

        if current.as_ref().is_some_and(|m| m.token == self.token) {
            match fs::remove_file(&self.path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(io_err(&self.path)(e)),
            }
            debug!(lock = %self.name, "lock released");
        } else {
            warn!(lock = %self.name, "lock was taken over by another holder; not removing");
        }
        Ok(())
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(lock = %self.name, error = %e, "failed to release lock");
        }
    }
}

// ---------------------------------------------------------------------------
// Process and host helpers
// ---------------------------------------------------------------------------

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Is `pid` a running process on this host?
fn pid_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    if pid == std::process::id() {
        return true;
    }
    probe_pid(pid)
}

#[cfg(target_os = "linux")]
fn probe_pid(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(all(unix, not(target_os = "linux")))]
fn probe_pid(pid: u32) -> bool {
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .is_ok_and(|s| s.success())
}

#[cfg(not(unix))]
fn probe_pid(_pid: u32) -> bool {
    // No portable probe: rely on the age ceiling.
    true
}

fn local_host() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.trim().is_empty())
        .or_else(|| fs::read_to_string("/proc/sys/kernel/hostname").ok())
        .or_else(|| fs::read_to_string("/etc/hostname").ok())
        .map(|h| h.trim().to_owned())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_owned())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
