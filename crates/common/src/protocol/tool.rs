// Remote tool invocation contract.
//
// The execution agent exposes `Initialize` and `BashCommand` tools. Every
// response is a single opaque string, so the helpers here are the entire
// parsing surface for it.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

pub const TOOL_INITIALIZE: &str = "Initialize";
pub const TOOL_BASH_COMMAND: &str = "BashCommand";

/// Phrases the agent uses when a thread handle is no longer valid.
pub const STALE_SESSION_PHRASES: &[&str] =
    &["no saved bash state", "unknown thread", "invalid thread", "initialize first"];

/// Arguments for the `Initialize` tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitializeArgs {
    #[serde(rename = "type")]
    pub kind: String,
    pub any_workspace_path: String,
    pub initial_files_to_read: Vec<String>,
    pub task_id_to_resume: String,
    pub mode_name: String,
    pub thread_id: String,
}

impl InitializeArgs {
    pub fn first_call(workspace_path: &str) -> Self {
        Self {
            kind: "first_call".to_string(),
            any_workspace_path: workspace_path.to_string(),
            initial_files_to_read: Vec::new(),
            task_id_to_resume: String::new(),
            mode_name: "wcgw".to_string(),
            thread_id: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BashAction {
    pub command: String,
}

/// Arguments for the `BashCommand` tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BashCommandArgs {
    pub action_json: BashAction,
    pub thread_id: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl BashCommandArgs {
    pub fn new(command: impl Into<String>, thread_id: impl Into<String>) -> Self {
        Self {
            action_json: BashAction { command: command.into() },
            thread_id: thread_id.into(),
            kind: TOOL_BASH_COMMAND.to_string(),
        }
    }
}

fn thread_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?i)thread_id\s*[=:]\s*["']?([A-Za-z0-9_\-]+)"#)
            .expect("thread id pattern should compile")
    })
}

/// Extract the session handle from an `Initialize` response.
pub fn parse_thread_id(response: &str) -> Option<String> {
    thread_id_pattern()
        .captures(response)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str().to_string())
}

/// Whether a `BashCommand` response says the handle has gone stale.
pub fn is_stale_session(response: &str) -> bool {
    let lowered = response.to_ascii_lowercase();
    STALE_SESSION_PHRASES.iter().any(|phrase| lowered.contains(phrase))
}

/// Drop the trailing status block the agent appends after command output:
///
/// ```text
/// <output>
///
/// ---
///
/// status = process exited
/// cwd = /path
/// ```
pub fn strip_status_footer(response: &str) -> &str {
    let Some(index) = response.rfind("\n---") else {
        return response;
    };
    let footer = response[index + 4..].trim();
    if footer.lines().all(|line| line.trim().is_empty() || line.contains(" = ")) && !footer.is_empty()
    {
        response[..index].trim_end()
    } else {
        response
    }
}
