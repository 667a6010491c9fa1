// Repository bootstrap for project directories.
//
// Makes sure a project is a git repository on `main` with a local identity
// before the first commit. Keys already bootstrapped in this process are
// skipped; `reset` forgets them.

use std::collections::HashSet;
use std::sync::Mutex;

use kibitz_common::branch::DEFAULT_BRANCH;
use serde::Serialize;
use tracing::info;

use super::error::VcsError;
use super::executor::shell_quote;
use super::session::SessionKey;
use super::vcs::ProjectVcs;

/// Local state directory kept out of commits through `.git/info/exclude`.
pub const LOCAL_STATE_EXCLUDE: &str = ".kibitz/";

/// Append `.kibitz/` to `.git/info/exclude` unless already listed. A project
/// without a `.git` directory is left alone.
pub async fn exclude_local_state(vcs: &ProjectVcs) -> Result<(), VcsError> {
    let pattern = shell_quote(LOCAL_STATE_EXCLUDE);
    let command = format!(
        "if [ -d .git ]; then grep -qxF {pattern} .git/info/exclude 2>/dev/null || \
{{ mkdir -p .git/info && echo {pattern} >> .git/info/exclude; }}; fi"
    );
    vcs.run_checked(&command).await.map(drop)
}

/// Identity written into repositories that have none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitIdentity {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoInitOutcome {
    pub already_initialized: bool,
    pub created: bool,
    pub renamed_default_branch: bool,
    pub configured_identity: bool,
}

#[derive(Debug, Default)]
pub struct RepoInitializer {
    initialized: Mutex<HashSet<SessionKey>>,
}

impl RepoInitializer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_initialized(&self, server_id: &str, project_path: &str) -> bool {
        self.lock().contains(&SessionKey::new(server_id, project_path))
    }

    pub fn reset(&self) {
        self.lock().clear();
    }

    /// Idempotent bootstrap: `git init` when `.git` is missing, `master`
    /// renamed to `main` on fresh or unborn repositories, local
    /// `user.name`/`user.email` set when unset.
    pub async fn ensure_repo(
        &self,
        vcs: &ProjectVcs,
        identity: &GitIdentity,
    ) -> Result<RepoInitOutcome, VcsError> {
        let key = SessionKey::new(vcs.server_id(), vcs.project_path());
        if self.lock().contains(&key) {
            return Ok(RepoInitOutcome { already_initialized: true, ..RepoInitOutcome::default() });
        }

        let mut outcome = RepoInitOutcome::default();
        let presence = vcs.run_checked("test -d .git && echo present || echo missing").await?;
        if presence.trim() == "missing" {
            vcs.run_checked("git init").await?;
            outcome.created = true;
        }

        let head_ref = vcs.run("git symbolic-ref --short HEAD").await;
        if head_ref.success && head_ref.output.trim() == "master" {
            let has_commits = vcs.run("git rev-parse --verify --quiet HEAD").await;
            let has_commits = has_commits.success && !has_commits.output.trim().is_empty();
            if !has_commits {
                vcs.run_checked(&format!("git symbolic-ref HEAD refs/heads/{DEFAULT_BRANCH}")).await?;
                outcome.renamed_default_branch = true;
            } else if outcome.created {
                vcs.run_checked(&format!("git branch -m master {DEFAULT_BRANCH}")).await?;
                outcome.renamed_default_branch = true;
            }
        }

        for (field, value) in [("user.name", &identity.name), ("user.email", &identity.email)] {
            let current = vcs.run(&format!("git config {field}")).await;
            if current.output.trim().is_empty() {
                vcs.run_checked(&format!("git config {field} {}", shell_quote(value))).await?;
                outcome.configured_identity = true;
            }
        }

        exclude_local_state(vcs).await?;

        info!(
            project_path = vcs.project_path(),
            created = outcome.created,
            renamed = outcome.renamed_default_branch,
            "repository ready"
        );
        self.lock().insert(key);
        Ok(outcome)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<SessionKey>> {
        self.initialized.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
