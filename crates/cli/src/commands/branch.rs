// `kibitz branch <conversation-id>`: cut the next conversation step branch.

use clap::Args;
use kibitz_daemon::git::conversation::{create_conversation_branch, ConversationBranchOutcome};

use super::{block_on, short_hash, ProjectArgs, ProjectContext};
use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct BranchArgs {
    #[command(flatten)]
    pub project: ProjectArgs,

    /// Conversation the branch belongs to.
    pub conversation_id: String,
}

pub fn run(args: BranchArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.project.json);
    let ctx = ProjectContext::open(&args.project)?;

    let outcome = block_on(async {
        ctx.ensure_repo().await?;
        let outcome = create_conversation_branch(&ctx.vcs, &args.conversation_id).await?;
        anyhow::Ok(outcome)
    })??;

    output::print_output(format, &outcome, format_human)?;
    Ok(())
}

fn format_human(outcome: &ConversationBranchOutcome) -> String {
    let at = outcome.commit_hash.as_deref().map(short_hash).unwrap_or("unborn HEAD");
    format!("Created {} (step {}) from {} at {at}", outcome.branch, outcome.step, outcome.base_branch)
}
