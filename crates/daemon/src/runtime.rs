// Wiring shared by `kibitzd` and the `kibitz` CLI: executor construction,
// the per-project auto-commit trigger and the HTTP server loop.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::info;

use crate::api::{router, ApiState, ProjectLocator};
use crate::config::{resolve_projects_base_dir, GlobalConfig, ProjectConfig};
use crate::git::commit::CommitMessageClient;
use crate::git::executor::GitExecutor;
use crate::git::llm::HttpCommitMessageClient;
use crate::git::repo_init::{GitIdentity, RepoInitializer};
use crate::git::session::SessionManager;
use crate::git::state_cache::GitStateCache;
use crate::git::triggers::{push_trigger_for, AutoCommitTrigger};
use crate::tool::{ProcessToolInvoker, ToolInvoker};

/// Executor that runs commands on this machine.
pub fn local_executor(global: &GlobalConfig) -> Arc<GitExecutor> {
    executor_with(Arc::new(ProcessToolInvoker::new()), global)
}

pub fn executor_with(invoker: Arc<dyn ToolInvoker>, global: &GlobalConfig) -> Arc<GitExecutor> {
    let sessions = Arc::new(SessionManager::new(invoker));
    Arc::new(GitExecutor::new(sessions, GitStateCache::new(global.cache_ttl())))
}

pub fn identity(global: &GlobalConfig) -> GitIdentity {
    GitIdentity { name: global.author_name.clone(), email: global.author_email.clone() }
}

/// Auto-commit trigger configured from a project's settings: LLM client
/// when a provider key is available, push trigger when `auto_push` is set.
pub fn auto_commit_trigger(
    executor: Arc<GitExecutor>,
    initializer: Arc<RepoInitializer>,
    global: &GlobalConfig,
    project: &ProjectConfig,
) -> AutoCommitTrigger {
    let message_client = if project.git.use_llm_messages {
        HttpCommitMessageClient::for_project(&project.llm)
            .map(|client| Arc::new(client) as Arc<dyn CommitMessageClient>)
    } else {
        None
    };
    let push = if project.git.auto_push {
        push_trigger_for(&project.git, &executor, &global.server_id)
    } else {
        None
    };
    AutoCommitTrigger::new(executor, initializer, identity(global))
        .with_message_client(message_client)
        .with_push_trigger(push)
}

pub fn projects_dir(override_dir: Option<&Path>, global: &GlobalConfig) -> Result<PathBuf> {
    resolve_projects_base_dir(override_dir, global).context("could not determine projects directory")
}

/// Serve the read API until ctrl-c or SIGTERM.
pub async fn serve(global: GlobalConfig, projects_dir_override: Option<&Path>) -> Result<()> {
    let base = projects_dir(projects_dir_override, &global)?;
    let executor = local_executor(&global);
    let state = ApiState::new(executor, ProjectLocator::new(&base), &global.server_id);

    let listener = TcpListener::bind(&global.listen_addr)
        .await
        .with_context(|| format!("failed to bind listener on {}", global.listen_addr))?;

    info!(listen_addr = %global.listen_addr, projects_dir = %base.display(), "starting kibitz daemon");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("daemon server exited unexpectedly")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderKind;

    #[test]
    fn trigger_wiring_respects_project_switches() {
        let global = GlobalConfig { cache_ttl_ms: 0, ..GlobalConfig::default() };
        let executor = local_executor(&global);
        assert!(executor.cache().ttl().is_zero());

        let mut project = ProjectConfig::default();
        project.llm.provider = ProviderKind::OpenAi;
        project.llm.openai_api_key = Some("sk-test".into());
        project.git.auto_push = true;

        // Construction must not touch the network or the tool server.
        let _trigger = auto_commit_trigger(executor, Arc::new(RepoInitializer::new()), &global, &project);
    }

    #[test]
    fn identity_comes_from_global_config() {
        let global = GlobalConfig { author_name: "Ada".into(), ..GlobalConfig::default() };
        assert_eq!(identity(&global).name, "Ada");
        assert_eq!(identity(&global).email, "kibitz@localhost");
    }

    #[test]
    fn explicit_projects_dir_wins() {
        let dir = projects_dir(Some(Path::new("/srv/projects")), &GlobalConfig::default()).unwrap();
        assert_eq!(dir, PathBuf::from("/srv/projects"));
    }
}
