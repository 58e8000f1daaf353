use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use clap::{CommandFactory, Parser, Subcommand};

use taskmerge::config::TaskmergeConfig;
use taskmerge::lock::LockManager;
use taskmerge::telemetry;
use taskmerge_git::{GitCli, GitQuery};

mod merge_cmd;
mod task_cmd;

/// Intent-aware merge engine for isolated task branches
///
/// Each task is a branch `task/<name>` with its own worktree. When a task
/// is done, `taskmerge merge` folds its changes into the base branch's
/// working tree: new files are copied, deletions applied, package-manager
/// lock files kept at the base version, and files changed on both sides
/// merged three-way (with the configured merge oracle for real conflicts).
/// Results are staged, never committed.
///
/// QUICK START:
///
///   taskmerge task new fix-login          # creates task/001-fix-login
///   # ... work and commit in .taskmerge/worktrees/001-fix-login ...
///   taskmerge check 001-fix-login         # dry-run conflict check
///   taskmerge merge 001-fix-login         # merge into main, staged
///   git commit                            # after reviewing the result
///   taskmerge task destroy 001-fix-login
///
/// Set TASKMERGE_LOG=pretty (or stderr for JSON) to see what a run does.
#[derive(Parser)]
#[command(name = "taskmerge")]
#[command(version, about)]
#[command(propagate_version = true)]
#[command(
    after_help = "See 'taskmerge <command> --help' for more information on a specific command."
)]
struct Cli {
    /// Repository to operate on (default: the current directory)
    #[arg(long, global = true, env = "TASKMERGE_REPO")]
    repo: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create, list, and destroy tasks
    #[command(subcommand)]
    Task(task_cmd::TaskCommands),

    /// Merge a task branch into the base branch's working tree
    Merge(merge_cmd::MergeArgs),

    /// Dry-run conflict check between a task and the base branch
    ///
    /// Never touches the working tree, the index, or any lock.
    Check(merge_cmd::CheckArgs),

    /// Print shell completions
    Completions {
        /// Target shell
        shell: clap_complete::Shell,
    },
}

/// What every subcommand needs: the repository, its config, and its locks.
pub struct Context {
    pub git: GitCli,
    pub config: TaskmergeConfig,
    pub locks: LockManager,
}

impl Context {
    fn open(repo: Option<&Path>) -> Result<Self> {
        let cwd = match repo {
            Some(p) => p.to_path_buf(),
            None => std::env::current_dir().context("could not read the current directory")?,
        };
        let git = GitCli::open(&cwd).with_context(|| format!("opening {}", cwd.display()))?;
        let config = TaskmergeConfig::load_from_repo(git.root())?;
        let locks = LockManager::for_repo(&git).context("locating the lock directory")?;
        Ok(Self { git, config, locks })
    }
}

fn main() -> Result<()> {
    telemetry::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "taskmerge", &mut std::io::stdout());
            Ok(())
        }
        Commands::Task(cmd) => task_cmd::run(&Context::open(cli.repo.as_deref())?, cmd),
        Commands::Merge(args) => {
            let ok = merge_cmd::merge(&Context::open(cli.repo.as_deref())?, &args)?;
            if !ok {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Check(args) => merge_cmd::check(&Context::open(cli.repo.as_deref())?, &args),
    }
}
