//! Git abstraction layer for taskmerge.
//!
//! This crate defines the two traits through which the merge engine and the
//! task registry talk to git: [`GitQuery`] (side-effect free) and
//! [`GitWorktree`] (staging, branches, worktrees). [`GitCli`] implements both
//! by shelling out to the `git` binary.
//!
//! # Crate layout
//!
//! - [`query`] — the [`GitQuery`] trait.
//! - [`worktree`] — the [`GitWorktree`] trait.
//! - [`types`] — value types used in trait signatures ([`GitOid`],
//!   [`DiffEntry`], [`RenamePair`], [`ConflictCheck`]).
//! - [`error`] — the [`GitError`] enum returned by all trait methods.

pub mod error;
pub mod query;
pub mod types;
pub mod worktree;

mod cli;
mod parse;

pub use cli::GitCli;

pub use error::GitError;
pub use query::GitQuery;
pub use types::{
    ChangeKind, ConflictCheck, ConflictSource, DiffEntry, GitOid, OidParseError, RenamePair,
};
pub use worktree::GitWorktree;
