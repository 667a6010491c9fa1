// Commit and branch orchestration for one project.
//
// `ProjectVcs` binds an executor to a (server, project path) pair and turns
// sequences of git commands into commit, rollback and revert operations.
// Caller-supplied refs are validated before they reach the shell.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use kibitz_common::branch::{backup_branch_name, is_safe_ref_name, strip_ref_prefix};
use kibitz_common::mirror::{parse_branch_listing, BranchSummary, BRANCH_LISTING_FORMAT};
use kibitz_common::types::{
    parse_name_status, parse_numstat, parse_porcelain, ChangedFile, CommitRecord, DiffStats,
};
use serde::Serialize;
use tracing::{info, warn};

use super::classify::{commit_summary, OutputKind};
use super::commit::{generate_commit_message, CommitMessageClient, GeneratedMessage};
use super::error::VcsError;
use super::executor::{shell_quote, GitCommandResult, GitExecutor};
use super::state_cache::TrackedQuery;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoStatus {
    pub branch: Option<String>,
    pub head: Option<String>,
    pub changed_files: Vec<ChangedFile>,
}

impl RepoStatus {
    pub fn is_dirty(&self) -> bool {
        !self.changed_files.is_empty()
    }
}

/// Staged changes, ready to commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreparedCommit {
    pub files: Vec<ChangedFile>,
    pub stats: DiffStats,
    pub diff: String,
}

impl PreparedCommit {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitOutcome {
    pub committed: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<CommitRecord>,
}

impl CommitOutcome {
    fn nothing_to_commit() -> Self {
        Self { committed: false, message: String::new(), record: None }
    }

    pub fn commit_hash(&self) -> Option<&str> {
        self.record.as_ref().map(|r| r.hash.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RollbackOptions {
    pub stash_changes: bool,
    pub create_backup: bool,
}

impl Default for RollbackOptions {
    fn default() -> Self {
        Self { stash_changes: true, create_backup: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevertOptions {
    pub create_backup: bool,
    pub stash_changes: bool,
    pub force: bool,
}

impl Default for RevertOptions {
    fn default() -> Self {
        Self { create_backup: true, stash_changes: true, force: false }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackOutcome {
    pub target: String,
    pub backup_branch: Option<String>,
    pub stashed: bool,
}

/// Full or abbreviated object name.
pub fn is_commit_hash(value: &str) -> bool {
    (4..=40).contains(&value.len()) && value.chars().all(|c| c.is_ascii_hexdigit())
}

/// A ref name optionally followed by `~N` / `^N` ancestry suffixes.
pub fn is_safe_revision(value: &str) -> bool {
    let base = value.trim_end_matches(|c: char| c.is_ascii_digit() || c == '~' || c == '^');
    is_commit_hash(value) || is_safe_ref_name(base)
}

/// Branch names from `git branch -a`, stripped of remote prefixes, sorted and
/// deduplicated.
pub fn parse_branch_list(output: &str) -> Vec<String> {
    let mut names: Vec<String> = output
        .lines()
        .map(|line| line.trim().trim_start_matches("* ").trim())
        .filter(|line| !line.is_empty() && !line.contains(" -> ") && !line.starts_with('('))
        .map(|line| strip_ref_prefix(line).to_string())
        .collect();
    names.sort();
    names.dedup();
    names
}

#[derive(Clone)]
pub struct ProjectVcs {
    executor: Arc<GitExecutor>,
    server_id: String,
    project_path: String,
}

impl ProjectVcs {
    pub fn new(executor: Arc<GitExecutor>, server_id: &str, project_path: &str) -> Self {
        Self { executor, server_id: server_id.to_string(), project_path: project_path.to_string() }
    }

    pub fn executor(&self) -> &Arc<GitExecutor> {
        &self.executor
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub fn project_path(&self) -> &str {
        &self.project_path
    }

    pub async fn run(&self, command: &str) -> GitCommandResult {
        self.executor.run(&self.server_id, &self.project_path, command).await
    }

    pub async fn run_as(&self, command: &str, kind: OutputKind) -> GitCommandResult {
        self.executor.run_as(&self.server_id, &self.project_path, command, kind).await
    }

    /// Output of a command that must succeed.
    pub async fn run_checked(&self, command: &str) -> Result<String, VcsError> {
        self.run_checked_as(command, OutputKind::Diagnostic).await
    }

    /// Output of a record-producing command (`--format`, `--porcelain`, path
    /// listings) that must succeed.
    pub async fn read_records(&self, command: &str) -> Result<String, VcsError> {
        self.run_checked_as(command, OutputKind::Formatted).await
    }

    async fn run_checked_as(&self, command: &str, kind: OutputKind) -> Result<String, VcsError> {
        let result = self.run_as(command, kind).await;
        if result.success {
            Ok(result.output)
        } else {
            Err(VcsError::command_failed(command, result.error_message()))
        }
    }

    async fn query(&self, query: TrackedQuery) -> GitCommandResult {
        self.executor.query(&self.server_id, &self.project_path, query).await
    }

    // ── Reads ──────────────────────────────────────────────────────

    /// Branch, HEAD and changed files. Reads go through the state cache, so
    /// the answer may be up to one TTL old.
    pub async fn status(&self) -> Result<RepoStatus, VcsError> {
        let changes = self.query(TrackedQuery::Status).await;
        if !changes.success {
            return Err(VcsError::command_failed(TrackedQuery::Status.command(), changes.error_message()));
        }
        let branch = self.query(TrackedQuery::CurrentBranch).await;
        let head = self.query(TrackedQuery::Head).await;
        Ok(RepoStatus {
            branch: non_empty(branch),
            head: non_empty(head),
            changed_files: parse_porcelain(&changes.output),
        })
    }

    /// Changed files read directly, bypassing the cache.
    pub async fn fresh_changes(&self) -> Result<Vec<ChangedFile>, VcsError> {
        let output = self.read_records(TrackedQuery::Status.command()).await?;
        Ok(parse_porcelain(&output))
    }

    /// HEAD read directly; `None` on an unborn branch.
    pub async fn head(&self) -> Option<String> {
        non_empty(self.run_as(TrackedQuery::Head.command(), OutputKind::Formatted).await)
    }

    pub async fn current_branch(&self) -> Option<String> {
        non_empty(self.run_as(TrackedQuery::CurrentBranch.command(), OutputKind::Formatted).await)
    }

    pub async fn list_branches(&self) -> Result<Vec<String>, VcsError> {
        let output = self.read_records("git branch -a").await?;
        Ok(parse_branch_list(&output))
    }

    pub async fn branch_exists(&self, branch: &str) -> Result<bool, VcsError> {
        Ok(self.list_branches().await?.iter().any(|name| name == branch))
    }

    /// Local branches with their tip commit.
    pub async fn branch_listing(&self) -> Result<Vec<BranchSummary>, VcsError> {
        let command =
            format!("git for-each-ref --format={} refs/heads", shell_quote(BRANCH_LISTING_FORMAT));
        let output = self.read_records(&command).await?;
        Ok(parse_branch_listing(&output))
    }

    /// Branch names matching a `for-each-ref` pattern.
    pub async fn ref_names(&self, pattern: &str) -> Result<Vec<String>, VcsError> {
        let command =
            format!("git for-each-ref --format='%(refname:short)' {}", shell_quote(pattern));
        let output = self.read_records(&command).await?;
        Ok(output.lines().map(str::trim).filter(|l| !l.is_empty()).map(str::to_string).collect())
    }

    pub async fn commit_info(&self, hash: &str) -> Result<CommitRecord, VcsError> {
        if !is_commit_hash(hash) {
            return Err(VcsError::InvalidRef(hash.to_string()));
        }
        let header = self
            .read_records(&format!("git show --no-patch --format='%H%x09%P%x09%an%x09%aI%x09%s' {hash}"))
            .await?;
        let numstat = self.read_records(&format!("git show --numstat --format= {hash}")).await?;

        let mut fields = header.lines().next().unwrap_or_default().splitn(5, '\t');
        let full_hash = fields.next().unwrap_or_default().trim().to_string();
        let parent_hash = fields
            .next()
            .and_then(|parents| parents.split_whitespace().next())
            .map(str::to_string);
        let author = fields.next().unwrap_or_default().to_string();
        let timestamp = fields.next().and_then(parse_timestamp);
        let subject = fields.next().unwrap_or_default().to_string();
        let stats = parse_numstat(&numstat);

        Ok(CommitRecord {
            hash: full_hash,
            parent_hash,
            author,
            timestamp,
            subject,
            files: numstat
                .lines()
                .filter_map(|line| line.splitn(3, '\t').nth(2))
                .map(str::to_string)
                .collect(),
            lines_added: stats.lines_added,
            lines_removed: stats.lines_removed,
            ..CommitRecord::default()
        })
    }

    /// Paths changed between two commits.
    pub async fn changed_paths(&self, from: &str, to: &str) -> Result<Vec<String>, VcsError> {
        for rev in [from, to] {
            if !is_safe_revision(rev) {
                return Err(VcsError::InvalidRef(rev.to_string()));
            }
        }
        let output = self.read_records(&format!("git diff --name-only {from} {to}")).await?;
        Ok(output.lines().filter(|l| !l.trim().is_empty()).map(str::to_string).collect())
    }

    // ── Branch moves ───────────────────────────────────────────────

    pub async fn checkout(&self, branch: &str) -> Result<(), VcsError> {
        if !is_safe_ref_name(branch) {
            return Err(VcsError::InvalidRef(branch.to_string()));
        }
        self.run_checked(&format!("git checkout {branch}")).await.map(drop)
    }

    pub async fn create_branch_and_checkout(&self, branch: &str) -> Result<(), VcsError> {
        if !is_safe_ref_name(branch) {
            return Err(VcsError::InvalidRef(branch.to_string()));
        }
        self.run_checked(&format!("git checkout -b {branch}")).await.map(drop)
    }

    // ── Commits ────────────────────────────────────────────────────

    /// Stage everything and collect what a commit would contain.
    pub async fn prepare_commit(&self) -> Result<PreparedCommit, VcsError> {
        self.run_checked("git add -A").await?;
        let name_status = self.read_records("git diff --cached --name-status").await?;
        let numstat = self.read_records("git diff --cached --numstat").await?;
        let diff = self.run("git diff --cached").await;
        Ok(PreparedCommit {
            files: parse_name_status(&name_status),
            stats: parse_numstat(&numstat),
            // Diff text may legitimately contain failure markers.
            diff: diff.output,
        })
    }

    /// Commit staged changes. An explicit message wins; otherwise the
    /// generator is consulted and falls back to a heuristic message.
    pub async fn execute_commit(
        &self,
        prepared: &PreparedCommit,
        message: Option<String>,
        generator: Option<&dyn CommitMessageClient>,
    ) -> Result<CommitOutcome, VcsError> {
        if prepared.is_empty() {
            return Ok(CommitOutcome::nothing_to_commit());
        }

        let generated = match message.map(|m| m.trim().to_string()).filter(|m| !m.is_empty()) {
            Some(message) => GeneratedMessage { message, provider: None, model: None, error: None },
            None => generate_commit_message(generator, &prepared.diff, &prepared.stats, &prepared.files).await,
        };

        let command = format!("git commit -m {}", shell_quote(&generated.message));
        let result = self.run_as(&command, OutputKind::Commit).await;
        if commit_summary(&result.output).is_none() && result.output.contains("nothing to commit") {
            return Ok(CommitOutcome::nothing_to_commit());
        }
        if !result.success {
            return Err(VcsError::command_failed("git commit", result.error_message()));
        }

        let hash = self.head().await.ok_or_else(|| {
            VcsError::command_failed(TrackedQuery::Head.command(), "commit did not produce a HEAD")
        })?;
        let parent_hash = non_empty(self.run_as("git rev-parse HEAD~1", OutputKind::Formatted).await);
        let author_line = self.run_as("git log -1 --format='%an%x09%aI'", OutputKind::Formatted).await;
        let mut author_fields = author_line.output.splitn(2, '\t');
        let author = author_fields.next().unwrap_or_default().trim().to_string();
        let timestamp = author_fields.next().and_then(parse_timestamp);

        info!(
            project_path = %self.project_path,
            hash = %hash,
            files = prepared.files.len(),
            llm = generated.used_llm(),
            "committed changes"
        );

        let record = CommitRecord {
            hash,
            parent_hash,
            author,
            timestamp,
            subject: generated.message.clone(),
            diff: prepared.diff.clone(),
            files: prepared.files.iter().map(|f| f.path.clone()).collect(),
            lines_added: prepared.stats.lines_added,
            lines_removed: prepared.stats.lines_removed,
            llm_message: generated.used_llm().then(|| generated.message.clone()),
            provider: generated.provider.clone(),
            model: generated.model.clone(),
            error: generated.error.clone(),
        };
        Ok(CommitOutcome { committed: true, message: generated.message, record: Some(record) })
    }

    pub async fn commit_all(
        &self,
        message: Option<String>,
        generator: Option<&dyn CommitMessageClient>,
    ) -> Result<CommitOutcome, VcsError> {
        let prepared = self.prepare_commit().await?;
        self.execute_commit(&prepared, message, generator).await
    }

    // ── Rollback / revert ──────────────────────────────────────────

    /// Hard-reset to `hash`, optionally stashing dirty work and recording the
    /// current HEAD on a backup branch first.
    pub async fn rollback_to_commit(
        &self,
        hash: &str,
        options: RollbackOptions,
    ) -> Result<RollbackOutcome, VcsError> {
        if !is_commit_hash(hash) {
            return Err(VcsError::InvalidRef(hash.to_string()));
        }

        let stashed = if options.stash_changes {
            self.stash_if_dirty(&format!("rollback to {}", short(hash))).await?
        } else {
            false
        };
        let backup_branch =
            if options.create_backup { Some(self.create_backup_branch().await?) } else { None };

        let command = format!("git reset --hard {hash}");
        let result = self.run(&command).await;
        if !(result.output.contains("HEAD is now at") || result.success) {
            return Err(VcsError::command_failed(&command, result.error_message()));
        }

        info!(project_path = %self.project_path, target = hash, ?backup_branch, stashed, "rolled back");
        Ok(RollbackOutcome { target: hash.to_string(), backup_branch, stashed })
    }

    /// Check out an existing branch, optionally stashing and backing up first.
    pub async fn revert_to_branch(
        &self,
        branch: &str,
        options: RevertOptions,
    ) -> Result<RollbackOutcome, VcsError> {
        if !is_safe_ref_name(branch) {
            return Err(VcsError::InvalidRef(branch.to_string()));
        }
        if !self.branch_exists(branch).await? {
            return Err(VcsError::BranchNotFound(branch.to_string()));
        }

        let stashed = if options.stash_changes {
            self.stash_if_dirty(&format!("revert to {branch}")).await?
        } else {
            false
        };
        let backup_branch =
            if options.create_backup { Some(self.create_backup_branch().await?) } else { None };

        let command = if options.force {
            format!("git checkout --force {branch}")
        } else {
            format!("git checkout {branch}")
        };
        self.run_checked(&command).await?;

        info!(project_path = %self.project_path, %branch, ?backup_branch, stashed, "reverted to branch");
        Ok(RollbackOutcome { target: branch.to_string(), backup_branch, stashed })
    }

    async fn stash_if_dirty(&self, reason: &str) -> Result<bool, VcsError> {
        if self.fresh_changes().await?.is_empty() {
            return Ok(false);
        }
        let message = format!("kibitz: auto-stash before {reason}");
        self.run_checked(&format!("git stash push -u -m {}", shell_quote(&message))).await?;
        Ok(true)
    }

    async fn create_backup_branch(&self) -> Result<String, VcsError> {
        let name = backup_branch_name(Utc::now());
        let result = self.run(&format!("git branch {name}")).await;
        if !result.success {
            warn!(project_path = %self.project_path, branch = %name, error = %result.error_message(), "backup branch failed");
            return Err(VcsError::command_failed("git branch", result.error_message()));
        }
        Ok(name)
    }
}

fn non_empty(result: GitCommandResult) -> Option<String> {
    let value = result.output.trim();
    (result.success && !value.is_empty()).then(|| value.to_string())
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim()).ok().map(|dt| dt.with_timezone(&Utc))
}

fn short(hash: &str) -> &str {
    hash.get(..7).unwrap_or(hash)
}
