// Commit message generation.
//
// Asks an LLM for a short conventional commit message from a truncated diff.
// Every failure path (no client, empty diff, provider error, empty answer)
// degrades to a heuristic message so committing never blocks on the model.

use std::future::Future;
use std::pin::Pin;

use kibitz_common::types::{ChangeKind, ChangedFile, DiffStats};
use serde::Serialize;
use tracing::{debug, warn};

use super::llm::LlmError;

/// Diff lines sent to the model.
pub const MAX_DIFF_LINES: usize = 50;

/// Hard cap on the cleaned subject line.
pub const MAX_MESSAGE_CHARS: usize = 72;

/// Used when the model answers with something too short to be a message.
pub const MINIMAL_FALLBACK_MESSAGE: &str = "Auto-commit: changes detected";

/// System prompt instructing the LLM to generate conventional commit messages.
pub const SYSTEM_PROMPT: &str = "\
You are a commit message generator. Write a single conventional commit message.\n\
Rules:\n\
- One line, imperative mood, at most 50 characters\n\
- Format: type: description\n\
- Types: feat, fix, docs, refactor, test, chore, style, perf, config\n\
- Output ONLY the commit message, nothing else";

/// Generates commit messages from a prompt.
///
/// `HttpCommitMessageClient` calls a hosted model; tests inject canned
/// responses.
pub trait CommitMessageClient: Send + Sync {
    fn provider(&self) -> &str;

    fn model(&self) -> &str;

    fn generate(
        &self,
        system: &str,
        user_prompt: &str,
    ) -> Pin<Box<dyn Future<Output = Result<String, LlmError>> + Send>>;
}

/// Result of message generation. `error` is set whenever the fallback was
/// used; `provider` and `model` are set whenever a client was consulted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedMessage {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GeneratedMessage {
    pub fn used_llm(&self) -> bool {
        self.provider.is_some() && self.error.is_none()
    }
}

fn is_diff_header(line: &str) -> bool {
    line.starts_with("diff --git")
        || line.starts_with("index ")
        || line.starts_with("--- ")
        || line.starts_with("+++ ")
        || line.starts_with("@@")
        || line.starts_with("new file mode")
        || line.starts_with("deleted file mode")
        || line.starts_with("rename ")
}

fn is_change_line(line: &str) -> bool {
    (line.starts_with('+') || line.starts_with('-')) && !is_diff_header(line)
}

/// Cut a unified diff down to `max_lines`.
///
/// File and hunk headers are kept first; the remaining budget goes to added
/// and removed lines in diff order. Context lines are dropped. A marker line
/// reports how many lines were omitted.
pub fn truncate_diff(diff: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = diff.lines().collect();
    if lines.len() <= max_lines {
        return diff.to_string();
    }

    let headers = lines.iter().filter(|line| is_diff_header(line)).count();
    let mut change_budget = max_lines.saturating_sub(headers);
    let mut kept: Vec<&str> = Vec::with_capacity(max_lines);
    for line in &lines {
        if kept.len() == max_lines {
            break;
        }
        if is_diff_header(line) {
            kept.push(line);
        } else if is_change_line(line) && change_budget > 0 {
            change_budget -= 1;
            kept.push(line);
        }
    }

    let omitted = lines.len() - kept.len();
    let mut out = kept.join("\n");
    out.push_str(&format!("\n... [diff truncated, {omitted} more lines]"));
    out
}

/// Build the user prompt from the staged diff, its stats and the file list.
pub fn build_prompt(diff: &str, stats: &DiffStats, files: &[ChangedFile]) -> String {
    let mut prompt = String::from(
        "Generate a git commit message of at most 50 characters for these changes.\n\
         Use conventional commit format (feat:, fix:, docs:, refactor:, test:, chore:).\n\
         Respond with the commit message only.\n\n",
    );

    prompt.push_str(&format!(
        "Changed files ({}, +{} -{}):\n",
        files.len().max(stats.files_changed),
        stats.lines_added,
        stats.lines_removed
    ));
    for file in files {
        prompt.push_str(&format!("  {} {}\n", file.kind.marker(), file.path));
    }
    prompt.push_str("\nDiff:\n");
    prompt.push_str(&truncate_diff(diff, MAX_DIFF_LINES));
    prompt
}

/// Normalize a raw model answer into a single subject line.
pub fn clean_commit_message(raw: &str) -> String {
    let line = raw.lines().map(str::trim).find(|line| !line.is_empty()).unwrap_or_default();

    let line = strip_label(line);
    let line = line.trim_matches(|c| matches!(c, '"' | '\'' | '`')).trim();
    let line = strip_label(line);

    let truncated: String = line.chars().take(MAX_MESSAGE_CHARS).collect();
    let cleaned = truncated.trim().to_string();
    if cleaned.chars().count() < 3 {
        return MINIMAL_FALLBACK_MESSAGE.to_string();
    }
    cleaned
}

fn strip_label(line: &str) -> &str {
    const LABEL: &str = "commit message:";
    match line.get(..LABEL.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(LABEL) => line[LABEL.len()..].trim(),
        _ => line,
    }
}

// ── Heuristic fallback ─────────────────────────────────────────────

const DOC_EXTENSIONS: &[&str] = &["md", "txt", "rst", "adoc"];
const CONFIG_EXTENSIONS: &[&str] = &["json", "yaml", "yml", "toml", "ini", "env", "lock", "config"];

fn extension(path: &str) -> Option<String> {
    let name = path.rsplit('/').next().unwrap_or(path);
    name.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase())
}

fn has_extension(path: &str, set: &[&str]) -> bool {
    extension(path).is_some_and(|ext| set.contains(&ext.as_str()))
}

fn is_test_path(path: &str) -> bool {
    let mut segments: Vec<&str> = path.split('/').collect();
    let name = segments.pop().unwrap_or_default();
    if segments.iter().any(|s| matches!(*s, "test" | "tests" | "__tests__")) {
        return true;
    }
    let stem = name.rsplit_once('.').map_or(name, |(stem, _)| stem);
    stem.ends_with("_test") || stem.ends_with(".test") || stem.ends_with(".spec")
}

fn files_label(count: usize) -> &'static str {
    if count == 1 {
        "file"
    } else {
        "files"
    }
}

/// Deterministic message from the changed-file list alone.
pub fn fallback_commit_message(files: &[ChangedFile]) -> String {
    if files.is_empty() {
        return "chore: update project files".to_string();
    }
    let count = files.len();
    if files.iter().all(|f| has_extension(&f.path, DOC_EXTENSIONS)) {
        return "docs: update documentation".to_string();
    }
    if files.iter().all(|f| has_extension(&f.path, CONFIG_EXTENSIONS)) {
        return "config: update configuration".to_string();
    }
    if files.iter().all(|f| is_test_path(&f.path)) {
        return "test: update tests".to_string();
    }
    if files.iter().any(|f| matches!(f.kind, ChangeKind::Added | ChangeKind::Untracked)) {
        return format!("feat: add {count} {}", files_label(count));
    }
    if files.iter().all(|f| f.kind == ChangeKind::Deleted) {
        return format!("chore: remove {count} {}", files_label(count));
    }
    format!("refactor: update {count} {}", files_label(count))
}

/// Generate a commit message, falling back to `fallback_commit_message`.
pub async fn generate_commit_message(
    client: Option<&dyn CommitMessageClient>,
    diff: &str,
    stats: &DiffStats,
    files: &[ChangedFile],
) -> GeneratedMessage {
    let fallback = |provider: Option<String>, model: Option<String>, error: String| {
        warn!(%error, "using fallback commit message");
        GeneratedMessage { message: fallback_commit_message(files), provider, model, error: Some(error) }
    };

    let Some(client) = client else {
        return fallback(None, None, "no LLM client configured".to_string());
    };
    let provider = Some(client.provider().to_string());
    let model = Some(client.model().to_string());

    if diff.trim().is_empty() {
        return fallback(provider, model, "empty diff".to_string());
    }

    let prompt = build_prompt(diff, stats, files);
    match client.generate(SYSTEM_PROMPT, &prompt).await {
        Ok(raw) if raw.trim().is_empty() => fallback(provider, model, LlmError::EmptyResponse.to_string()),
        Ok(raw) => {
            let message = clean_commit_message(&raw);
            debug!(%message, provider = client.provider(), "generated commit message");
            GeneratedMessage { message, provider, model, error: None }
        }
        Err(error) => fallback(provider, model, error.to_string()),
    }
}
