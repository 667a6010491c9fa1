// `kibitz turn-end`: the auto-commit pipeline run when an agent turn finishes.

use std::sync::Arc;

use clap::Args;
use kibitz_daemon::git::repo_init::RepoInitializer;
use kibitz_daemon::git::triggers::{AutoCommitOutcome, CommitMode, SkipReason, TurnContext};
use kibitz_daemon::runtime;

use super::{block_on, short_hash, ProjectArgs, ProjectContext};
use crate::exit_code::{ExitCode, Reported};
use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct TurnEndArgs {
    #[command(flatten)]
    pub project: ProjectArgs,

    /// Conversation whose next step branch receives the commit.
    #[arg(long)]
    pub conversation: Option<String>,

    /// Commit regardless of the auto-commit switch and file threshold.
    #[arg(long)]
    pub manual: bool,
}

pub fn run(args: TurnEndArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.project.json);
    let ctx = ProjectContext::open(&args.project)?;

    let trigger = runtime::auto_commit_trigger(
        Arc::clone(&ctx.executor),
        Arc::new(RepoInitializer::new()),
        &ctx.global,
        &ctx.config,
    );
    let turn = TurnContext {
        server_id: ctx.global.server_id.clone(),
        project_path: ctx.vcs.project_path().to_string(),
        project_id: ctx.project_id.clone(),
        conversation_id: args.conversation.clone(),
        mode: if args.manual { CommitMode::Manual } else { CommitMode::Auto },
    };

    let outcome = block_on(trigger.handle_turn_end(&turn, &ctx.config.git))?;
    output::print_output(format, &outcome, format_human)?;
    exit_status(&outcome)
}

/// The outcome carries its own error text, so a failure only sets the code.
fn exit_status(outcome: &AutoCommitOutcome) -> anyhow::Result<()> {
    if outcome.success {
        Ok(())
    } else {
        Err(Reported(ExitCode::Error).into())
    }
}

fn format_human(outcome: &AutoCommitOutcome) -> String {
    if let Some(error) = &outcome.error {
        return format!("Turn not committed: {error}");
    }
    if let Some(reason) = &outcome.skipped {
        return match reason {
            SkipReason::NoChanges => "No changes to commit.".into(),
            SkipReason::Disabled => "Auto-commit is disabled for this project.".into(),
            SkipReason::BelowThreshold { changed, required } => {
                format!("Skipped: {changed} changed file(s), auto-commit needs {required}.")
            }
        };
    }
    if !outcome.changes_committed {
        return "No changes to commit.".into();
    }

    let mut lines = vec![format!(
        "Committed {} file(s) as {} on {}",
        outcome.changed_files,
        outcome.commit_hash.as_deref().map(short_hash).unwrap_or("?"),
        outcome.branch.as_deref().unwrap_or("HEAD"),
    )];
    if let Some(message) = &outcome.message {
        lines.push(format!("  {message}"));
    }
    if outcome.pushed {
        lines.push("  Pushed.".into());
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn committed() -> AutoCommitOutcome {
        AutoCommitOutcome {
            success: true,
            changes_committed: true,
            changed_files: 3,
            commit_hash: Some("abcdef0123".into()),
            branch: Some("conv-c1-step-1".into()),
            message: Some("feat: wire up parser".into()),
            pushed: true,
            skipped: None,
            error: None,
        }
    }

    #[test]
    fn human_summarizes_commit_and_push() {
        let text = format_human(&committed());
        assert!(text.starts_with("Committed 3 file(s) as abcdef0 on conv-c1-step-1"));
        assert!(text.contains("feat: wire up parser"));
        assert!(text.ends_with("Pushed."));
    }

    #[test]
    fn human_explains_threshold_skip() {
        let outcome = AutoCommitOutcome {
            changes_committed: false,
            changed_files: 1,
            commit_hash: None,
            branch: None,
            message: None,
            pushed: false,
            skipped: Some(SkipReason::BelowThreshold { changed: 1, required: 2 }),
            ..committed()
        };
        assert_eq!(format_human(&outcome), "Skipped: 1 changed file(s), auto-commit needs 2.");
    }

    #[test]
    fn human_reports_errors_first() {
        let outcome = AutoCommitOutcome { success: false, error: Some("boom".into()), ..committed() };
        assert_eq!(format_human(&outcome), "Turn not committed: boom");
    }

    #[test]
    fn failed_turn_sets_exit_code_without_a_second_message() {
        assert!(exit_status(&committed()).is_ok());

        let outcome = AutoCommitOutcome { success: false, error: Some("boom".into()), ..committed() };
        let error = exit_status(&outcome).unwrap_err();
        assert!(crate::exit_code::is_reported(&error));
        assert_eq!(ExitCode::from_error(&error), ExitCode::Error);
    }
}
