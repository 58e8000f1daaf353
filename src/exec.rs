//! Shell command execution with a timeout.
//!
//! Shared by [`CommandOracle`](crate::oracle::CommandOracle) and
//! [`CommandValidator`](crate::validate::CommandValidator). The command runs
//! under `sh -c`; stdin is fed and stdout/stderr are drained on helper
//! threads so a chatty child can never block on a full pipe while we poll
//! for exit.

use std::ffi::OsString;
use std::io::{self, Read as _, Write as _};
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// Captured result of one shell command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShellOutput {
    /// Exit code, `None` if killed by a signal or by the timeout.
    pub exit_code: Option<i32>,
    /// Raw stdout.
    pub stdout: Vec<u8>,
    /// Stderr, lossily decoded.
    pub stderr: String,
    /// `true` if the command was killed for exceeding its timeout.
    pub timed_out: bool,
    /// Wall time.
    pub duration: Duration,
}

impl ShellOutput {
    /// Did the command exit 0 within its timeout?
    #[must_use]
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// One-line description of a failed run, for error messages.
    #[must_use]
    pub fn failure_summary(&self) -> String {
        let head = if self.timed_out {
            format!("killed by timeout after {}s", self.duration.as_secs())
        } else {
            match self.exit_code {
                Some(code) => format!("exit code {code}"),
                None => "killed by signal".to_owned(),
            }
        };
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            head
        } else {
            format!("{head}: {stderr}")
        }
    }
}

/// Run `sh -c <command>` in `cwd`.
///
/// `stdin` is written to the child and then closed; without it the child's
/// stdin is null.
///
/// # Errors
/// Only spawn and wait failures are errors. A non-zero exit or a timeout is
/// reported through [`ShellOutput`].
pub fn run_shell(
    command: &str,
    cwd: &Path,
    env: &[(&str, OsString)],
    stdin: Option<&[u8]>,
    timeout: Duration,
) -> io::Result<ShellOutput> {
    let start = Instant::now();

    let mut cmd = Command::new("sh");
    cmd.args(["-c", command])
        .current_dir(cwd)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    for (key, value) in env {
        cmd.env(key, value);
    }
    let mut child = cmd.spawn()?;

    let feeder = match (stdin, child.stdin.take()) {
        (Some(bytes), Some(mut pipe)) => {
            let bytes = bytes.to_vec();
            // A child that exits without reading gives EPIPE; not our problem.
            Some(thread::spawn(move || {
                let _ = pipe.write_all(&bytes);
            }))
        }
        _ => None,
    };
    let stdout = child.stdout.take().map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            buf
        })
    });
    let stderr = child.stderr.take().map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            buf
        })
    });

    let mut timed_out = false;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if start.elapsed() >= timeout {
            let _ = child.kill();
            timed_out = true;
            break child.wait()?;
        }
        thread::sleep(Duration::from_millis(10));
    };

    if let Some(handle) = feeder {
        let _ = handle.join();
    }
    let stdout = stdout
        .and_then(|h| h.join().ok())
        .unwrap_or_default();
    let stderr = stderr
        .and_then(|h| h.join().ok())
        .unwrap_or_default();

    Ok(ShellOutput {
        exit_code: if timed_out { None } else { status.code() },
        stdout,
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        timed_out,
        duration: start.elapsed(),
    })
}
