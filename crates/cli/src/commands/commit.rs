// `kibitz commit`: stage everything and commit.

use std::sync::Arc;

use clap::Args;
use kibitz_daemon::git::commit::CommitMessageClient;
use kibitz_daemon::git::llm::HttpCommitMessageClient;
use kibitz_daemon::git::vcs::CommitOutcome;

use super::{block_on, short_hash, ProjectArgs, ProjectContext};
use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct CommitArgs {
    #[command(flatten)]
    pub project: ProjectArgs,

    /// Commit message; generated when omitted.
    #[arg(long, short)]
    pub message: Option<String>,

    /// Skip the LLM and use the heuristic message.
    #[arg(long)]
    pub no_llm: bool,
}

pub fn run(args: CommitArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.project.json);
    let ctx = ProjectContext::open(&args.project)?;

    let client: Option<Arc<dyn CommitMessageClient>> =
        if args.no_llm || !ctx.config.git.use_llm_messages || args.message.is_some() {
            None
        } else {
            HttpCommitMessageClient::for_project(&ctx.config.llm).map(|c| Arc::new(c) as Arc<dyn CommitMessageClient>)
        };

    let outcome = block_on(async {
        ctx.ensure_repo().await?;
        let outcome = ctx.vcs.commit_all(args.message.clone(), client.as_deref()).await?;
        anyhow::Ok(outcome)
    })??;

    output::print_output(format, &outcome, format_human)?;
    Ok(())
}

fn format_human(outcome: &CommitOutcome) -> String {
    match (&outcome.record, outcome.committed) {
        (Some(record), true) => {
            let mut line = format!(
                "Committed {} ({} files, +{} -{}): {}",
                short_hash(&record.hash),
                record.files.len(),
                record.lines_added,
                record.lines_removed,
                outcome.message
            );
            if let Some(error) = &record.error {
                line.push_str(&format!("\n  LLM message unavailable: {error}"));
            }
            line
        }
        _ => "Nothing to commit.".into(),
    }
}
