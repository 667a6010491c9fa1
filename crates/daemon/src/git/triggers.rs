// End-of-turn auto-commit.
//
// After an agent turn: make sure the project is a repository, read changes
// fresh, apply the file-count floor (auto mode only), cut the conversation's
// next step branch, commit, request a push, then refresh the mirror. Manual
// commits skip the floor and the auto-commit switch.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use super::commit::CommitMessageClient;
use super::conversation::create_conversation_branch;
use super::executor::GitExecutor;
use super::push::{GitPushTrigger, HttpPushTrigger, PushRequest, PushTrigger};
use super::repo_init::{GitIdentity, RepoInitializer};
use super::vcs::ProjectVcs;
use crate::config::GitConfig;
use crate::mirror::ApiMirror;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitMode {
    /// Fired by the agent at the end of a turn.
    Auto,
    /// Requested explicitly by the user.
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnContext {
    pub server_id: String,
    pub project_path: String,
    pub project_id: String,
    pub conversation_id: Option<String>,
    pub mode: CommitMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum SkipReason {
    NoChanges,
    Disabled,
    BelowThreshold { changed: usize, required: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoCommitOutcome {
    pub success: bool,
    pub changes_committed: bool,
    pub changed_files: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub pushed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<SkipReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AutoCommitOutcome {
    fn skipped(reason: SkipReason, changed_files: usize) -> Self {
        Self { skipped: Some(reason), changed_files, ..Self::succeeded() }
    }

    fn failed(error: impl ToString, changed_files: usize) -> Self {
        Self { success: false, changed_files, error: Some(error.to_string()), ..Self::succeeded() }
    }

    fn succeeded() -> Self {
        Self {
            success: true,
            changes_committed: false,
            changed_files: 0,
            commit_hash: None,
            branch: None,
            message: None,
            pushed: false,
            skipped: None,
            error: None,
        }
    }
}

/// Whether a turn with `changed` files should be committed. Manual mode is
/// exempt from both the switch and the floor.
pub fn should_commit(mode: CommitMode, settings: &GitConfig, changed: usize) -> Result<(), SkipReason> {
    if changed == 0 {
        return Err(SkipReason::NoChanges);
    }
    if mode == CommitMode::Manual {
        return Ok(());
    }
    if !settings.auto_commit {
        return Err(SkipReason::Disabled);
    }
    if changed < settings.min_files_for_auto_commit_push {
        return Err(SkipReason::BelowThreshold {
            changed,
            required: settings.min_files_for_auto_commit_push,
        });
    }
    Ok(())
}

/// Push trigger for a project: the configured endpoint when set, else git.
pub fn push_trigger_for(
    settings: &GitConfig,
    executor: &Arc<GitExecutor>,
    server_id: &str,
) -> Option<Arc<dyn PushTrigger>> {
    match settings.push_endpoint.as_deref() {
        Some(endpoint) => match HttpPushTrigger::new(endpoint) {
            Ok(trigger) => Some(Arc::new(trigger)),
            Err(error) => {
                warn!(%endpoint, %error, "push endpoint unusable");
                None
            }
        },
        None => Some(Arc::new(GitPushTrigger::new(Arc::clone(executor), server_id, &settings.remote))),
    }
}

pub struct AutoCommitTrigger {
    executor: Arc<GitExecutor>,
    initializer: Arc<RepoInitializer>,
    identity: GitIdentity,
    message_client: Option<Arc<dyn CommitMessageClient>>,
    push: Option<Arc<dyn PushTrigger>>,
    mirror: bool,
}

impl AutoCommitTrigger {
    pub fn new(executor: Arc<GitExecutor>, initializer: Arc<RepoInitializer>, identity: GitIdentity) -> Self {
        Self { executor, initializer, identity, message_client: None, push: None, mirror: true }
    }

    pub fn with_message_client(mut self, client: Option<Arc<dyn CommitMessageClient>>) -> Self {
        self.message_client = client;
        self
    }

    pub fn with_push_trigger(mut self, push: Option<Arc<dyn PushTrigger>>) -> Self {
        self.push = push;
        self
    }

    pub fn with_mirror(mut self, enabled: bool) -> Self {
        self.mirror = enabled;
        self
    }

    pub async fn handle_turn_end(&self, ctx: &TurnContext, settings: &GitConfig) -> AutoCommitOutcome {
        let vcs = ProjectVcs::new(Arc::clone(&self.executor), &ctx.server_id, &ctx.project_path);

        if let Err(error) = self.initializer.ensure_repo(&vcs, &self.identity).await {
            warn!(project_id = %ctx.project_id, %error, "repository bootstrap failed");
            return AutoCommitOutcome::failed(error, 0);
        }

        let changes = match vcs.fresh_changes().await {
            Ok(changes) => changes,
            Err(error) => return AutoCommitOutcome::failed(error, 0),
        };
        let changed = changes.len();

        if let Err(reason) = should_commit(ctx.mode, settings, changed) {
            info!(project_id = %ctx.project_id, changed, ?reason, "auto-commit skipped");
            return AutoCommitOutcome::skipped(reason, changed);
        }

        let mut outcome = AutoCommitOutcome { changed_files: changed, ..AutoCommitOutcome::succeeded() };

        if let Some(conversation_id) = ctx.conversation_id.as_deref() {
            match create_conversation_branch(&vcs, conversation_id).await {
                Ok(created) => outcome.branch = Some(created.branch),
                Err(error) => {
                    warn!(project_id = %ctx.project_id, conversation_id, %error, "conversation branch failed");
                    return AutoCommitOutcome::failed(error, changed);
                }
            }
        }

        let generator = if settings.use_llm_messages { self.message_client.as_deref() } else { None };
        let committed = match vcs.commit_all(None, generator).await {
            Ok(committed) => committed,
            Err(error) => return AutoCommitOutcome { branch: outcome.branch, ..AutoCommitOutcome::failed(error, changed) },
        };
        if !committed.committed {
            return outcome;
        }
        outcome.changes_committed = true;
        outcome.commit_hash = committed.commit_hash().map(str::to_string);
        outcome.message = Some(committed.message);

        if outcome.branch.is_none() {
            outcome.branch = vcs.current_branch().await;
        }

        if settings.auto_push {
            outcome.pushed = self.request_push(ctx, outcome.branch.as_deref()).await;
        }

        if self.mirror {
            let mirror = ApiMirror::for_project(Path::new(&ctx.project_path));
            if let Err(error) = mirror.rebuild(&vcs, &ctx.project_id).await {
                warn!(project_id = %ctx.project_id, %error, "mirror rebuild failed");
            }
        }

        info!(
            project_id = %ctx.project_id,
            changed,
            commit = outcome.commit_hash.as_deref().unwrap_or_default(),
            pushed = outcome.pushed,
            "turn committed"
        );
        outcome
    }

    async fn request_push(&self, ctx: &TurnContext, branch: Option<&str>) -> bool {
        let (Some(push), Some(branch)) = (self.push.as_ref(), branch) else {
            return false;
        };
        let request = PushRequest {
            project_id: ctx.project_id.clone(),
            project_path: ctx.project_path.clone(),
            branch_name: branch.to_string(),
        };
        match push.push(request).await {
            Ok(receipt) => receipt.pushed,
            Err(error) => {
                warn!(project_id = %ctx.project_id, branch, %error, "push request failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::git::push::{PushError, PushFuture, PushReceipt};
    use crate::testing::{scripted_executor, ScriptedInvoker};

    #[derive(Default)]
    struct RecordingPush {
        requests: Mutex<Vec<PushRequest>>,
        fail: bool,
    }

    impl PushTrigger for RecordingPush {
        fn push(&self, request: PushRequest) -> PushFuture<'_> {
            let branch = request.branch_name.clone();
            self.requests.lock().unwrap().push(request);
            let fail = self.fail;
            Box::pin(async move {
                if fail {
                    Err(PushError::Status { status: 502, body: "bad gateway".into() })
                } else {
                    Ok(PushReceipt { pushed: true, branch, message: None })
                }
            })
        }
    }

    fn context(mode: CommitMode, conversation_id: Option<&str>) -> TurnContext {
        TurnContext {
            server_id: "srv".into(),
            project_path: "/work/p1".into(),
            project_id: "p1".into(),
            conversation_id: conversation_id.map(str::to_string),
            mode,
        }
    }

    fn settings(min_files: usize) -> GitConfig {
        GitConfig { min_files_for_auto_commit_push: min_files, auto_push: true, ..GitConfig::default() }
    }

    fn script_repo(invoker: &ScriptedInvoker, porcelain: &str) {
        invoker.on("test -d .git", "present\n");
        invoker.on("git symbolic-ref --short HEAD", "main\n");
        invoker.on("git config user.", "set\n");
        invoker.on("git status --porcelain", porcelain);
        invoker.on("git diff --cached", "diff --git a/a.rs b/a.rs\n+x\n");
        invoker.on("git diff --cached --name-status", &name_status(porcelain));
        invoker.on("git diff --cached --numstat", "1\t0\ta.rs\n");
        invoker.on("git commit -m", "[main 1234567] feat: work\n");
        invoker.on("git rev-parse HEAD", "1234567abcdef\n");
        invoker.on("git branch --show-current", "main\n");
    }

    fn name_status(porcelain: &str) -> String {
        porcelain.lines().map(|l| format!("M\t{}\n", l[3..].trim())).collect()
    }

    fn trigger(invoker_push: Arc<RecordingPush>) -> (Arc<ScriptedInvoker>, AutoCommitTrigger) {
        let (invoker, executor) = scripted_executor();
        let trigger = AutoCommitTrigger::new(
            executor,
            Arc::new(RepoInitializer::new()),
            GitIdentity { name: "Kibitz".into(), email: "kibitz@localhost".into() },
        )
        .with_push_trigger(Some(invoker_push))
        .with_mirror(false);
        (invoker, trigger)
    }

    #[tokio::test]
    async fn one_file_below_floor_is_skipped() {
        let push = Arc::new(RecordingPush::default());
        let (invoker, trigger) = trigger(Arc::clone(&push));
        script_repo(&invoker, " M a.rs\n");

        let outcome = trigger.handle_turn_end(&context(CommitMode::Auto, None), &settings(2)).await;

        assert!(outcome.success);
        assert!(!outcome.changes_committed);
        assert_eq!(outcome.skipped, Some(SkipReason::BelowThreshold { changed: 1, required: 2 }));
        assert!(!invoker.ran("git add -A"));
        assert!(!invoker.ran("git commit"));
        assert!(push.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn two_files_commit_and_push() {
        let push = Arc::new(RecordingPush::default());
        let (invoker, trigger) = trigger(Arc::clone(&push));
        script_repo(&invoker, " M a.rs\n?? b.rs\n");

        let outcome = trigger.handle_turn_end(&context(CommitMode::Auto, None), &settings(2)).await;

        assert!(outcome.success);
        assert!(outcome.changes_committed);
        assert_eq!(outcome.changed_files, 2);
        assert_eq!(outcome.commit_hash.as_deref(), Some("1234567abcdef"));
        assert!(outcome.pushed);
        assert!(invoker.ran("git commit -m"));

        let requests = push.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].project_id, "p1");
        assert_eq!(requests[0].branch_name, "main");
    }

    #[tokio::test]
    async fn manual_mode_ignores_floor_and_switch() {
        let push = Arc::new(RecordingPush::default());
        let (invoker, trigger) = trigger(push);
        script_repo(&invoker, " M a.rs\n");
        let settings = GitConfig { auto_commit: false, min_files_for_auto_commit_push: 10, ..GitConfig::default() };

        let outcome = trigger.handle_turn_end(&context(CommitMode::Manual, None), &settings).await;

        assert!(outcome.changes_committed);
        assert!(!outcome.pushed);
    }

    #[tokio::test]
    async fn disabled_auto_commit_is_skipped() {
        let (invoker, trigger) = trigger(Arc::new(RecordingPush::default()));
        script_repo(&invoker, " M a.rs\n M b.rs\n");
        let settings = GitConfig { auto_commit: false, ..GitConfig::default() };

        let outcome = trigger.handle_turn_end(&context(CommitMode::Auto, None), &settings).await;

        assert_eq!(outcome.skipped, Some(SkipReason::Disabled));
        assert!(!invoker.ran("git commit"));
    }

    #[tokio::test]
    async fn clean_tree_reports_no_changes() {
        let (invoker, trigger) = trigger(Arc::new(RecordingPush::default()));
        script_repo(&invoker, "");

        let outcome = trigger.handle_turn_end(&context(CommitMode::Manual, None), &settings(2)).await;

        assert!(outcome.success);
        assert_eq!(outcome.skipped, Some(SkipReason::NoChanges));
    }

    #[tokio::test]
    async fn conversation_turn_commits_on_step_branch() {
        let push = Arc::new(RecordingPush::default());
        let (invoker, trigger) = trigger(Arc::clone(&push));
        script_repo(&invoker, " M a.rs\n M b.rs\n");
        invoker.on("for-each-ref", "conv-c1-step-1\n");

        let outcome = trigger.handle_turn_end(&context(CommitMode::Auto, Some("c1")), &settings(2)).await;

        assert!(outcome.changes_committed);
        assert_eq!(outcome.branch.as_deref(), Some("conv-c1-step-2"));
        assert!(invoker.ran("git checkout conv-c1-step-1"));
        assert!(invoker.ran("git checkout -b conv-c1-step-2"));
        assert_eq!(push.requests.lock().unwrap()[0].branch_name, "conv-c1-step-2");
    }

    #[tokio::test]
    async fn branch_failure_aborts_commit() {
        let (invoker, trigger) = trigger(Arc::new(RecordingPush::default()));
        script_repo(&invoker, " M a.rs\n M b.rs\n");
        invoker.on("for-each-ref", "conv-c1-step-1\n");
        invoker.on("git checkout conv-c1-step-1", "error: pathspec 'conv-c1-step-1' did not match any file(s) known to git");

        let outcome = trigger.handle_turn_end(&context(CommitMode::Auto, Some("c1")), &settings(2)).await;

        assert!(!outcome.success);
        assert!(!outcome.changes_committed);
        assert!(outcome.error.unwrap().contains("conv-c1-step-1"));
        assert!(!invoker.ran("git commit"));
    }

    #[tokio::test]
    async fn push_failure_is_not_fatal() {
        let push = Arc::new(RecordingPush { fail: true, ..RecordingPush::default() });
        let (invoker, trigger) = trigger(Arc::clone(&push));
        script_repo(&invoker, " M a.rs\n M b.rs\n");

        let outcome = trigger.handle_turn_end(&context(CommitMode::Auto, None), &settings(2)).await;

        assert!(outcome.success);
        assert!(outcome.changes_committed);
        assert!(!outcome.pushed);
        assert_eq!(push.requests.lock().unwrap().len(), 1);
    }

    #[test]
    fn threshold_boundaries() {
        let cfg = GitConfig { min_files_for_auto_commit_push: 3, ..GitConfig::default() };
        assert_eq!(
            should_commit(CommitMode::Auto, &cfg, 2),
            Err(SkipReason::BelowThreshold { changed: 2, required: 3 })
        );
        assert_eq!(should_commit(CommitMode::Auto, &cfg, 3), Ok(()));
        assert_eq!(should_commit(CommitMode::Auto, &cfg, 4), Ok(()));
        assert_eq!(should_commit(CommitMode::Manual, &cfg, 1), Ok(()));
        assert_eq!(should_commit(CommitMode::Manual, &cfg, 0), Err(SkipReason::NoChanges));
    }
}
