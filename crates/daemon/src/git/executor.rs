// Git command execution through the tool transport.
//
// A logical command plus a working directory becomes one `BashCommand`
// (`cd '<dir>' && <command>`), routed through the session manager. The
// merged output is classified by text markers because the transport carries
// no exit code.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use kibitz_common::protocol::tool::strip_status_footer;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::classify::{classify_as, OutputKind};
use super::session::SessionManager;
use super::state_cache::{CacheKey, CachedValue, GitStateCache, TrackedQuery};

/// Size of the rolling command window kept for diagnostics.
const DIAGNOSTIC_WINDOW: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GitCommandResult {
    pub success: bool,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GitCommandResult {
    pub fn failed(message: impl Into<String>) -> Self {
        let message = message.into();
        Self { success: false, output: String::new(), error: Some(message) }
    }

    fn from_output(output: &str, kind: OutputKind) -> Self {
        let output = strip_status_footer(output).trim_end().to_string();
        let classification = classify_as(&output, kind);
        Self { success: classification.success, output, error: classification.error }
    }

    /// Error text for logs and results: the classified line, else the output.
    pub fn error_message(&self) -> String {
        self.error.clone().unwrap_or_else(|| self.output.clone())
    }
}

/// Single-quote a value for bash.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Stable identifier for a project directory: the alphanumeric prefix before
/// the first `_` of the directory name (`<id>_<name>` layout), else the first
/// 12 hex characters of the SHA-256 of the path.
pub fn project_id_for(project_path: &str) -> String {
    let name = Path::new(project_path.trim_end_matches('/'))
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    if let Some((prefix, _)) = name.split_once('_') {
        if !prefix.is_empty() && prefix.chars().all(|c| c.is_ascii_alphanumeric()) {
            return prefix.to_string();
        }
    }
    let digest = Sha256::digest(project_path.as_bytes());
    digest.iter().take(6).map(|b| format!("{b:02x}")).collect()
}

/// Rolling window of recently executed commands.
#[derive(Debug, Default)]
pub struct CommandDiagnostics {
    recent: Mutex<VecDeque<String>>,
}

impl CommandDiagnostics {
    pub fn record(&self, command: &str) {
        let mut recent = self.recent.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if recent.len() == DIAGNOSTIC_WINDOW {
            recent.pop_front();
        }
        recent.push_back(command_label(command));
    }

    /// Most frequent command labels in the window, highest count first, ties
    /// by label.
    pub fn top_commands(&self, n: usize) -> Vec<(String, usize)> {
        let recent = self.recent.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for label in recent.iter() {
            *counts.entry(label.as_str()).or_default() += 1;
        }
        let mut ranked: Vec<(String, usize)> =
            counts.into_iter().map(|(label, count)| (label.to_string(), count)).collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(n);
        ranked
    }
}

/// `git status --porcelain` -> `git status`.
fn command_label(command: &str) -> String {
    command.split_whitespace().take(2).collect::<Vec<_>>().join(" ")
}

pub struct GitExecutor {
    sessions: Arc<SessionManager>,
    cache: GitStateCache,
    diagnostics: CommandDiagnostics,
}

impl GitExecutor {
    pub fn new(sessions: Arc<SessionManager>, cache: GitStateCache) -> Self {
        Self { sessions, cache, diagnostics: CommandDiagnostics::default() }
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn cache(&self) -> &GitStateCache {
        &self.cache
    }

    pub fn diagnostics(&self) -> &CommandDiagnostics {
        &self.diagnostics
    }

    /// Run `command` inside `project_path`. Never fails: transport errors
    /// come back as unsuccessful results.
    pub async fn run(&self, server_id: &str, project_path: &str, command: &str) -> GitCommandResult {
        self.run_as(server_id, project_path, command, OutputKind::Diagnostic).await
    }

    /// `run` with the output classified as `kind`.
    pub async fn run_as(
        &self,
        server_id: &str,
        project_path: &str,
        command: &str,
        kind: OutputKind,
    ) -> GitCommandResult {
        let started = Instant::now();
        let full_command = format!("cd {} && {command}", shell_quote(project_path));
        self.diagnostics.record(command);

        let result = match self.sessions.bash(server_id, project_path, &full_command).await {
            Ok(output) => GitCommandResult::from_output(&output, kind),
            Err(error) => {
                warn!(server_id, project_path, command, %error, "tool invocation failed");
                GitCommandResult::failed(error.to_string())
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let project_id = project_id_for(project_path);
        if result.success {
            info!(%project_id, server_id, command, elapsed_ms, success = true, "git command");
        } else {
            info!(
                %project_id,
                server_id,
                command,
                elapsed_ms,
                success = false,
                error = result.error.as_deref().unwrap_or_default(),
                "git command"
            );
        }
        result
    }

    /// Run a tracked read query through the state cache.
    pub async fn query(
        &self,
        server_id: &str,
        project_path: &str,
        query: TrackedQuery,
    ) -> GitCommandResult {
        let key = CacheKey::new(server_id, project_path, query.command());
        if let Some(cached) = self.cache.get(&key) {
            debug!(server_id, project_path, command = query.command(), "state cache hit");
            return GitCommandResult {
                success: cached.success,
                error: if cached.success { None } else { Some(cached.value.clone()) },
                output: cached.value,
            };
        }

        let result = self.run_as(server_id, project_path, query.command(), OutputKind::Formatted).await;
        self.cache.insert(
            key,
            CachedValue {
                value: if result.success { result.output.clone() } else { result.error_message() },
                success: result.success,
            },
        );
        result
    }
}
