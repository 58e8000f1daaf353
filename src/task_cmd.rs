//! `taskmerge task` subcommands.

use anyhow::{Result, bail};
use clap::Subcommand;

use taskmerge::task::{TaskName, TaskRegistry};

use crate::Context;

/// `taskmerge task` subcommands.
#[derive(Subcommand)]
pub enum TaskCommands {
    /// Create a task branch and its worktree
    ///
    /// The task is numbered automatically: `fix-login` becomes
    /// `001-fix-login` on branch `task/001-fix-login`, checked out under
    /// the configured worktree directory.
    ///
    /// Examples:
    ///   taskmerge task new fix-login
    ///   taskmerge task new add-search --base develop
    #[command(verbatim_doc_comment)]
    New {
        /// Short lowercase slug (letters, digits, hyphens)
        slug: String,

        /// Branch to start from (default: repo.base_branch from config)
        #[arg(long)]
        base: Option<String>,
    },

    /// List tasks
    List,

    /// Remove a task's worktree and branch
    ///
    /// Waits for a running merge of the same task to finish first.
    /// Unmerged commits on the branch are lost.
    Destroy {
        /// Task name (e.g. 001-fix-login)
        name: String,
    },
}

pub fn run(ctx: &Context, cmd: TaskCommands) -> Result<()> {
    let registry = TaskRegistry::new(
        &ctx.git,
        ctx.locks.clone(),
        ctx.config.lock.numbering_settings(),
        ctx.config.lock.task_settings(),
        &ctx.config.repo.worktree_dir,
    );

    match cmd {
        TaskCommands::New { slug, base } => {
            let base = base.as_deref().unwrap_or(&ctx.config.repo.base_branch);
            let task = registry.create(&slug, base)?;
            println!("Created task {} on branch {}", task.name, task.branch);
            if let Some(path) = task.worktree {
                println!("  Worktree: {}", path.display());
            }
        }
        TaskCommands::List => {
            let tasks = registry.list()?;
            if tasks.is_empty() {
                println!("No tasks. Create one with: taskmerge task new <slug>");
            }
            for task in tasks {
                match task.worktree {
                    Some(path) => println!("{:<32} {}", task.name.as_str(), path.display()),
                    None => println!("{:<32} (no worktree)", task.name.as_str()),
                }
            }
        }
        TaskCommands::Destroy { name } => {
            let Ok(name) = TaskName::new(&name) else {
                bail!("'{name}' is not a valid task name; see: taskmerge task list");
            };
            registry.destroy(&name)?;
            println!("Destroyed task {name}");
        }
    }
    Ok(())
}
