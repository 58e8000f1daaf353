//! Value types shared between the git traits and their callers.
//!
//! These types carry no process or CLI details — the backend is an
//! implementation detail of [`GitCli`](crate::GitCli).

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// GitOid
// ---------------------------------------------------------------------------

/// A git object identifier.
///
/// Repositories use either SHA-1 (20 bytes, 40 hex characters) or SHA-256
/// (32 bytes, 64 hex characters) object names, depending on
/// `extensions.objectFormat`. Displays as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GitOid {
    /// A SHA-1 object name.
    Sha1([u8; 20]),
    /// A SHA-256 object name.
    Sha256([u8; 32]),
}

impl GitOid {
    /// Return the raw bytes (20 or 32 of them).
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Sha1(bytes) => bytes,
            Self::Sha256(bytes) => bytes,
        }
    }

    /// The first 12 hex characters, for log lines and summaries.
    #[must_use]
    pub fn short(&self) -> String {
        self.to_string()[..12].to_owned()
    }
}

impl fmt::Display for GitOid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.as_bytes() {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for GitOid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GitOid({self})")
    }
}

impl FromStr for GitOid {
    type Err = OidParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.len() {
            40 => decode_hex(s).map(Self::Sha1),
            64 => decode_hex(s).map(Self::Sha256),
            n => Err(OidParseError {
                value: s.to_owned(),
                reason: format!("expected 40 or 64 hex characters, got {n}"),
            }),
        }
    }
}

fn decode_hex<const N: usize>(s: &str) -> Result<[u8; N], OidParseError> {
    let bad = |c: u8| OidParseError {
        value: s.to_owned(),
        reason: format!("invalid hex digit '{}'", c as char),
    };
    let mut bytes = [0u8; N];
    for (byte, pair) in bytes.iter_mut().zip(s.as_bytes().chunks_exact(2)) {
        let hi = hex_digit(pair[0]).ok_or_else(|| bad(pair[0]))?;
        let lo = hex_digit(pair[1]).ok_or_else(|| bad(pair[1]))?;
        *byte = (hi << 4) | lo;
    }
    Ok(bytes)
}

/// Error from parsing a hex string into a [`GitOid`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OidParseError {
    /// The raw value that failed.
    pub value: String,
    /// Why it failed.
    pub reason: String,
}

impl fmt::Display for OidParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid OID {:?}: {}", self.value, self.reason)
    }
}

impl std::error::Error for OidParseError {}

const fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// ChangeKind / DiffEntry
// ---------------------------------------------------------------------------

/// How a path differs between two trees.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChangeKind {
    /// Path exists only on the newer side.
    Added,
    /// Path exists only on the older side.
    Deleted,
    /// Path exists on both sides with different content or mode.
    Modified,
}

impl ChangeKind {
    /// Map a `git diff --name-status` letter to a change kind.
    ///
    /// Type changes (`T`) count as modifications. Renames and copies never
    /// appear because the adapter diffs with `--no-renames`.
    #[must_use]
    pub const fn from_status_letter(letter: u8) -> Option<Self> {
        match letter {
            b'A' => Some(Self::Added),
            b'D' => Some(Self::Deleted),
            b'M' | b'T' => Some(Self::Modified),
            _ => None,
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Added => write!(f, "added"),
            Self::Deleted => write!(f, "deleted"),
            Self::Modified => write!(f, "modified"),
        }
    }
}

/// One changed path reported by [`GitQuery::changed_files`](crate::GitQuery::changed_files).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct DiffEntry {
    /// Path relative to the repository root.
    pub path: PathBuf,
    /// Kind of change.
    pub kind: ChangeKind,
}

// ---------------------------------------------------------------------------
// RenamePair
// ---------------------------------------------------------------------------

/// One rename observed in commit history, oldest first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenamePair {
    /// Path before the rename.
    pub from: PathBuf,
    /// Path after the rename.
    pub to: PathBuf,
    /// Similarity score reported by git (0–100).
    pub similarity: u8,
}

// ---------------------------------------------------------------------------
// ConflictCheck
// ---------------------------------------------------------------------------

/// Where a [`ConflictCheck`] came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConflictSource {
    /// `git merge-tree --write-tree` reported the conflicting paths.
    MergeTree,
    /// merge-tree was unavailable or unparseable; paths changed on both
    /// sides since the merge-base are reported instead. May over-report.
    BothSidesChanged,
}

impl fmt::Display for ConflictSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MergeTree => write!(f, "merge-tree"),
            Self::BothSidesChanged => write!(f, "both-sides-changed"),
        }
    }
}

/// Result of a side-effect-free three-way conflict check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConflictCheck {
    /// `true` if merging the two branches would conflict.
    pub has_conflicts: bool,
    /// Conflicting paths, sorted and deduplicated.
    pub conflicting_files: Vec<PathBuf>,
    /// Which strategy produced this result.
    pub source: ConflictSource,
}

impl ConflictCheck {
    /// A clean result from merge-tree.
    #[must_use]
    pub const fn clean() -> Self {
        Self {
            has_conflicts: false,
            conflicting_files: Vec::new(),
            source: ConflictSource::MergeTree,
        }
    }

    /// The heuristic result: every path in both change sets.
    #[must_use]
    pub fn both_sides_changed(
        ours: impl IntoIterator<Item = PathBuf>,
        theirs: impl IntoIterator<Item = PathBuf>,
    ) -> Self {
        let ours: BTreeSet<PathBuf> = ours.into_iter().collect();
        let conflicting_files: Vec<PathBuf> = theirs
            .into_iter()
            .filter(|p| ours.contains(p))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        Self {
            has_conflicts: !conflicting_files.is_empty(),
            conflicting_files,
            source: ConflictSource::BothSidesChanged,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
