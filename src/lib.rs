//! taskmerge library crate.
//!
//! The primary interface is the `taskmerge` binary. This lib.rs exposes the
//! engine so integration tests (and other tools) can drive merges, locks,
//! and tasks directly without going through the CLI.

pub mod config;
pub mod error;
pub mod exec;
pub mod lock;
pub mod merge;
pub mod oracle;
pub mod task;
pub mod telemetry;
pub mod validate;

pub use error::MergeError;
pub use merge::{MergeOptions, MergeOrchestrator, MergeRun};
