// CLI subcommand dispatch.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Subcommand};
use kibitz_daemon::config::{GlobalConfig, ProjectConfig};
use kibitz_daemon::git::executor::{project_id_for, GitExecutor};
use kibitz_daemon::git::repo_init::RepoInitializer;
use kibitz_daemon::git::vcs::ProjectVcs;
use kibitz_daemon::runtime;

pub mod branch;
pub mod commit;
pub mod mirror;
pub mod projects_dir;
pub mod rollback;
pub mod status;
pub mod turn_end;

#[derive(Subcommand)]
pub enum Command {
    /// Show branch, HEAD and uncommitted files
    Status(status::StatusArgs),
    /// Stage everything and commit
    Commit(commit::CommitArgs),
    /// Create the next step branch of a conversation
    Branch(branch::BranchArgs),
    /// Hard-reset to a commit, backing up the current HEAD
    Rollback(rollback::RollbackArgs),
    /// Check out an existing branch, backing up the current HEAD
    Revert(rollback::RevertArgs),
    /// Run the end-of-turn auto-commit pipeline
    TurnEnd(turn_end::TurnEndArgs),
    /// Rebuild the `.kibitz/api` mirror documents
    Mirror(mirror::MirrorArgs),
    /// Print the resolved projects directory
    ProjectsDir(projects_dir::ProjectsDirArgs),
}

impl Command {
    pub fn json_flag(&self) -> bool {
        match self {
            Self::Status(args) => args.project.json,
            Self::Commit(args) => args.project.json,
            Self::Branch(args) => args.project.json,
            Self::Rollback(args) => args.project.json,
            Self::Revert(args) => args.project.json,
            Self::TurnEnd(args) => args.project.json,
            Self::Mirror(args) => args.project.json,
            Self::ProjectsDir(args) => args.json,
        }
    }
}

pub fn run(cmd: Command) -> anyhow::Result<()> {
    match cmd {
        Command::Status(args) => status::run(args),
        Command::Commit(args) => commit::run(args),
        Command::Branch(args) => branch::run(args),
        Command::Rollback(args) => rollback::run_rollback(args),
        Command::Revert(args) => rollback::run_revert(args),
        Command::TurnEnd(args) => turn_end::run(args),
        Command::Mirror(args) => mirror::run(args),
        Command::ProjectsDir(args) => projects_dir::run(args),
    }
}

/// Flags shared by every project-scoped command.
#[derive(Debug, Clone, Args)]
pub struct ProjectArgs {
    /// Project directory (defaults to the current directory).
    #[arg(long)]
    pub project: Option<PathBuf>,

    /// Force JSON output.
    #[arg(long)]
    pub json: bool,
}

/// Everything a command needs to talk to one project.
pub struct ProjectContext {
    pub global: GlobalConfig,
    pub config: ProjectConfig,
    pub root: PathBuf,
    pub project_id: String,
    pub executor: Arc<GitExecutor>,
    pub vcs: ProjectVcs,
}

impl ProjectContext {
    pub fn open(args: &ProjectArgs) -> anyhow::Result<Self> {
        let root = match &args.project {
            Some(path) => path.clone(),
            None => std::env::current_dir().context("failed to read current directory")?,
        };
        let root = root
            .canonicalize()
            .with_context(|| format!("project directory {} does not exist", root.display()))?;
        let path = root.to_string_lossy().into_owned();

        let global = GlobalConfig::load();
        let config = ProjectConfig::load(&root);
        let executor = runtime::local_executor(&global);
        let vcs = ProjectVcs::new(Arc::clone(&executor), &global.server_id, &path);

        Ok(Self { project_id: project_id_for(&path), global, config, root, executor, vcs })
    }

    /// Bootstrap the repository before the first write.
    pub async fn ensure_repo(&self) -> anyhow::Result<()> {
        RepoInitializer::new()
            .ensure_repo(&self.vcs, &runtime::identity(&self.global))
            .await
            .context("failed to prepare repository")?;
        Ok(())
    }
}

/// Drive a command future to completion on a fresh current-thread runtime.
pub fn block_on<F: Future>(future: F) -> anyhow::Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    Ok(runtime.block_on(future))
}

pub fn short_hash(hash: &str) -> &str {
    hash.get(..7).unwrap_or(hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(subcommand)]
        command: Command,
    }

    #[test]
    fn parses_project_flags_on_every_subcommand() {
        let cli = TestCli::try_parse_from(["kibitz", "status", "--project", "/tmp/p", "--json"]).unwrap();
        assert!(cli.command.json_flag());

        let cli = TestCli::try_parse_from(["kibitz", "rollback", "abc1234", "--no-stash"]).unwrap();
        match cli.command {
            Command::Rollback(args) => {
                assert_eq!(args.hash, "abc1234");
                assert!(args.no_stash);
                assert!(!args.no_backup);
            }
            _ => panic!("expected rollback"),
        }
    }

    #[test]
    fn turn_end_flags_parse() {
        let cli =
            TestCli::try_parse_from(["kibitz", "turn-end", "--conversation", "c1", "--manual"]).unwrap();
        match cli.command {
            Command::TurnEnd(args) => {
                assert_eq!(args.conversation.as_deref(), Some("c1"));
                assert!(args.manual);
            }
            _ => panic!("expected turn-end"),
        }
    }

    #[test]
    fn branch_requires_conversation_id() {
        assert!(TestCli::try_parse_from(["kibitz", "branch"]).is_err());
    }

    #[test]
    fn short_hash_truncates() {
        assert_eq!(short_hash("abcdef1234567"), "abcdef1");
        assert_eq!(short_hash("abc"), "abc");
    }

    #[test]
    fn context_rejects_missing_directory() {
        let args = ProjectArgs { project: Some(PathBuf::from("/definitely/not/here")), json: false };
        assert!(ProjectContext::open(&args).is_err());
    }
}
