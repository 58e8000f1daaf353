//! Parsers for the NUL-separated output of the git plumbing commands
//! [`GitCli`](crate::GitCli) runs.
//!
//! Every command is invoked with `-z`, so paths arrive verbatim (no C-style
//! quoting) and may contain spaces, tabs, or newlines.

use std::path::PathBuf;

use crate::types::{ChangeKind, DiffEntry, GitOid, RenamePair};

/// Split `-z` output into non-empty UTF-8 tokens.
fn tokens(raw: &[u8]) -> impl Iterator<Item = String> + '_ {
    raw.split(|b| *b == 0)
        .filter(|t| !t.is_empty())
        .map(|t| String::from_utf8_lossy(t).into_owned())
}

/// Parse `git diff --name-status -z --no-renames` output.
///
/// The stream alternates `<status>\0<path>\0`. Output is sorted by path.
pub fn parse_name_status(raw: &[u8]) -> Result<Vec<DiffEntry>, String> {
    let mut entries = Vec::new();
    let mut it = tokens(raw);
    while let Some(status) = it.next() {
        let letter = status.as_bytes()[0];
        let kind = ChangeKind::from_status_letter(letter)
            .ok_or_else(|| format!("unsupported status {status:?}"))?;
        let path = it
            .next()
            .ok_or_else(|| format!("status {status:?} without a path"))?;
        entries.push(DiffEntry {
            path: PathBuf::from(path),
            kind,
        });
    }
    entries.sort();
    Ok(entries)
}

/// Parse `git log --format= --name-status -M --diff-filter=R -z` output.
///
/// Each rename is `R<score>\0<old>\0<new>\0`; commit boundaries may add
/// empty tokens, which [`tokens`] already drops.
pub fn parse_rename_log(raw: &[u8]) -> Result<Vec<RenamePair>, String> {
    let mut renames = Vec::new();
    let mut it = tokens(raw);
    while let Some(status) = it.next() {
        let Some(score) = status.strip_prefix('R') else {
            return Err(format!("expected a rename status, got {status:?}"));
        };
        let similarity = score
            .parse::<u8>()
            .map_err(|_| format!("bad similarity score in {status:?}"))?;
        let (Some(from), Some(to)) = (it.next(), it.next()) else {
            return Err(format!("rename {status:?} is missing a path"));
        };
        renames.push(RenamePair {
            from: PathBuf::from(from),
            to: PathBuf::from(to),
            similarity,
        });
    }
    Ok(renames)
}

/// Parse `git merge-tree --write-tree --name-only --no-messages -z` output.
///
/// The first token is the OID of the merged tree; every following token is
/// a conflicted path. Returns `None` when the first token is not an OID.
#[must_use]
pub fn parse_merge_tree(raw: &[u8]) -> Option<(GitOid, Vec<PathBuf>)> {
    let mut it = tokens(raw);
    let tree: GitOid = it.next()?.trim().parse().ok()?;
    let mut paths: Vec<PathBuf> = it.map(PathBuf::from).collect();
    paths.sort();
    paths.dedup();
    Some((tree, paths))
}

/// One `git ls-tree -z` entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TreeEntry {
    /// Object type (`blob`, `tree`, `commit`).
    pub kind: String,
    /// Object id.
    pub oid: GitOid,
}

/// Parse the first entry of `git ls-tree -z <rev> -- <path>` output.
///
/// Each entry is `<mode> SP <type> SP <oid> TAB <path>\0`. Empty output means
/// the path does not exist at that revision.
pub fn parse_ls_tree(raw: &[u8]) -> Result<Option<TreeEntry>, String> {
    let Some(first) = tokens(raw).next() else {
        return Ok(None);
    };
    let (meta, _path) = first
        .split_once('\t')
        .ok_or_else(|| format!("ls-tree entry without a tab: {first:?}"))?;
    let mut fields = meta.split(' ');
    let (Some(_mode), Some(kind), Some(oid)) = (fields.next(), fields.next(), fields.next())
    else {
        return Err(format!("malformed ls-tree entry: {first:?}"));
    };
    let oid = oid.parse().map_err(|e| format!("{e}"))?;
    Ok(Some(TreeEntry {
        kind: kind.to_owned(),
        oid,
    }))
}
