// `kibitz rollback <hash>` and `kibitz revert <branch>`.

use clap::Args;
use kibitz_daemon::git::vcs::{RevertOptions, RollbackOptions, RollbackOutcome};

use super::{block_on, short_hash, ProjectArgs, ProjectContext};
use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct RollbackArgs {
    #[command(flatten)]
    pub project: ProjectArgs,

    /// Commit to reset to.
    pub hash: String,

    /// Leave uncommitted changes in place instead of stashing them.
    #[arg(long)]
    pub no_stash: bool,

    /// Skip the backup branch of the current HEAD.
    #[arg(long)]
    pub no_backup: bool,
}

#[derive(Debug, Args)]
pub struct RevertArgs {
    #[command(flatten)]
    pub project: ProjectArgs,

    /// Existing branch to check out.
    pub branch: String,

    /// Discard local changes that would block the checkout.
    #[arg(long)]
    pub force: bool,

    #[arg(long)]
    pub no_stash: bool,

    #[arg(long)]
    pub no_backup: bool,
}

impl RollbackArgs {
    fn options(&self) -> RollbackOptions {
        RollbackOptions { stash_changes: !self.no_stash, create_backup: !self.no_backup }
    }
}

impl RevertArgs {
    fn options(&self) -> RevertOptions {
        RevertOptions { create_backup: !self.no_backup, stash_changes: !self.no_stash, force: self.force }
    }
}

pub fn run_rollback(args: RollbackArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.project.json);
    let ctx = ProjectContext::open(&args.project)?;
    let outcome = block_on(ctx.vcs.rollback_to_commit(&args.hash, args.options()))??;
    output::print_output(format, &outcome, |o| format_human("Rolled back to", o))?;
    Ok(())
}

pub fn run_revert(args: RevertArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.project.json);
    let ctx = ProjectContext::open(&args.project)?;
    let outcome = block_on(ctx.vcs.revert_to_branch(&args.branch, args.options()))??;
    output::print_output(format, &outcome, |o| format_human("Reverted to", o))?;
    Ok(())
}

fn format_human(action: &str, outcome: &RollbackOutcome) -> String {
    let mut lines = vec![format!("{action} {}", short_hash_or_branch(&outcome.target))];
    if let Some(backup) = &outcome.backup_branch {
        lines.push(format!("  Previous HEAD saved as {backup}"));
    }
    if outcome.stashed {
        lines.push("  Uncommitted changes stashed (see `git stash list`)".into());
    }
    lines.join("\n")
}

fn short_hash_or_branch(target: &str) -> &str {
    if kibitz_daemon::git::vcs::is_commit_hash(target) {
        short_hash(target)
    } else {
        target
    }
}
