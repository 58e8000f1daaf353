//! Base-side rename mapping.
//!
//! Only renames on the base branch (divergence point → base tip) matter:
//! the task branch is what gets merged in, so a task path must be redirected
//! to wherever the base branch moved that file.
//!
//! Renames arrive oldest first and are collapsed as they are folded in:
//!
//! - a chain `a → b`, later `b → c`, becomes `a → c`;
//! - a round trip `a → b → a` disappears;
//! - a second rename *from* a path already mapped (a new file reusing an
//!   old name) does not override the first, since task paths refer to the
//!   divergence-point file;
//! - a rename *into* a name that is itself mapped away (`a → b`, later
//!   `c → a`) is dropped, so `c` stays where it was.
//!
//! No target is ever also a source, so [`RenameMap::resolve`] is
//! idempotent. The dropped case leaves the task's `c` at its old path,
//! where it is classified on its own instead of landing on top of `a`.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use taskmerge_git::RenamePair;
use tracing::warn;

/// Old path → current path on the base branch.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RenameMap {
    map: BTreeMap<PathBuf, PathBuf>,
}

impl RenameMap {
    /// The empty (identity) mapping.
    #[must_use]
    pub fn identity() -> Self {
        Self::default()
    }

    /// Fold renames, oldest first.
    #[must_use]
    pub fn from_pairs<I, P>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (P, P)>,
        P: Into<PathBuf>,
    {
        let mut map: BTreeMap<PathBuf, PathBuf> = BTreeMap::new();
        for (from, to) in pairs {
            let (from, to) = (from.into(), to.into());
            let mut extended = false;
            for current in map.values_mut() {
                if *current == from {
                    current.clone_from(&to);
                    extended = true;
                }
            }
            if !extended {
                map.entry(from).or_insert(to);
            }
        }
        map.retain(|from, to| *from != *to);

        let sources: BTreeSet<PathBuf> = map.keys().cloned().collect();
        map.retain(|from, to| {
            let reused = sources.contains(to.as_path());
            if reused {
                warn!(
                    from = %from.display(),
                    to = %to.display(),
                    "rename target reuses a renamed-away name, keeping the old path"
                );
            }
            !reused
        });
        Self { map }
    }

    /// Fold renames reported by the VCS.
    #[must_use]
    pub fn from_renames(renames: &[RenamePair]) -> Self {
        Self::from_pairs(renames.iter().map(|r| (r.from.as_path(), r.to.as_path())))
    }

    /// Where `path` lives now; `path` itself if it was never moved.
    #[must_use]
    pub fn resolve<'a>(&'a self, path: &'a Path) -> &'a Path {
        self.map.get(path).map_or(path, PathBuf::as_path)
    }

    /// Number of mapped paths.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// `true` when every path maps to itself.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Mapped pairs, sorted by old path.
    #[must_use]
    pub fn iter(&self) -> impl Iterator<Item = (&Path, &Path)> {
        self.map.iter().map(|(k, v)| (k.as_path(), v.as_path()))
    }
}
