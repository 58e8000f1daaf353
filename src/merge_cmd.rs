//! `taskmerge merge` and `taskmerge check`.

use std::time::Duration;

use anyhow::{Context as _, Result, anyhow};
use clap::Args;

use taskmerge::merge::{MergeOptions, MergeOrchestrator};
use taskmerge::oracle::{CommandOracle, ContentMergeOracle, NoOracle};
use taskmerge::validate::ValidatorSet;
use taskmerge_git::GitQuery;

use crate::Context;

/// Arguments for `taskmerge merge`.
#[derive(Args)]
pub struct MergeArgs {
    /// Task to merge (e.g. 001-fix-login)
    pub task: String,

    /// Branch to merge into (default: repo.base_branch from config)
    #[arg(long)]
    pub base: Option<String>,

    /// Print the full run report as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `taskmerge check`.
#[derive(Args)]
pub struct CheckArgs {
    /// Task to check
    pub task: String,

    /// Branch to check against (default: repo.base_branch from config)
    #[arg(long)]
    pub base: Option<String>,

    /// Print the result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Run a merge. Returns `false` if any file failed.
pub fn merge(ctx: &Context, args: &MergeArgs) -> Result<bool> {
    let base = args.base.as_deref().unwrap_or(&ctx.config.repo.base_branch);

    let oracle: Box<dyn ContentMergeOracle> = match &ctx.config.oracle.command {
        Some(command) => Box::new(CommandOracle::new(
            command.clone(),
            ctx.git.root(),
            Duration::from_secs(ctx.config.oracle.timeout_secs),
        )),
        None => Box::new(NoOracle),
    };
    let validators = ValidatorSet::from_config(&ctx.config.validators, ctx.git.root())
        .map_err(|e| anyhow!("invalid validator pattern {e}"))?;
    let options = MergeOptions::from_config(&ctx.config)
        .map_err(|e| anyhow!("invalid lock file pattern {e}"))?;

    let orchestrator =
        MergeOrchestrator::new(&ctx.git, &ctx.locks, oracle.as_ref(), &validators, options);
    let run = orchestrator.merge_task(&args.task, base)?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&run).context("serializing the run report")?
        );
    } else {
        println!("{run}");
        if run.trivial {
            println!("  Next: git merge {}", run.task_branch);
        } else if !run.excluded_lock_files.is_empty() {
            println!("  Lock files kept at the base version; regenerate them if needed:");
            for path in &run.excluded_lock_files {
                println!("    {}", path.display());
            }
        }
        if !run.trivial && run.success() {
            println!("  Changes are staged. Review with: git diff --cached");
        }
    }
    Ok(run.success())
}

/// Run the dry-run conflict check.
pub fn check(ctx: &Context, args: &CheckArgs) -> Result<()> {
    let base = args.base.as_deref().unwrap_or(&ctx.config.repo.base_branch);
    let validators = ValidatorSet::none();
    let orchestrator = MergeOrchestrator::new(
        &ctx.git,
        &ctx.locks,
        &NoOracle,
        &validators,
        MergeOptions::default(),
    );
    let summary = orchestrator.check(&args.task, base)?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("serializing the check result")?
        );
        return Ok(());
    }

    if !summary.has_conflicts {
        println!("{} merges into {base} without textual conflicts.", args.task);
        return Ok(());
    }
    let note = if summary.heuristic {
        " (estimated: changed on both sides)"
    } else {
        ""
    };
    println!(
        "{} conflicts with {base} in {} file(s){note}:",
        args.task,
        summary.conflicting_files.len()
    );
    for path in &summary.conflicting_files {
        println!("  {}", path.display());
    }
    Ok(())
}
