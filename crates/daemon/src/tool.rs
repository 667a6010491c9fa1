// Tool invocation seam.
//
// Every git command reaches the workspace through a remote execution agent
// that exposes `Initialize` and `BashCommand` tools and answers with one
// opaque string. `ToolInvoker` is that contract; `ProcessToolInvoker` is a
// local stand-in that runs commands with `bash -c` on this machine.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use kibitz_common::protocol::tool::{
    BashCommandArgs, InitializeArgs, TOOL_BASH_COMMAND, TOOL_INITIALIZE,
};
use serde_json::Value;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;
use uuid::Uuid;

pub type ToolFuture<'a> = Pin<Box<dyn Future<Output = Result<String, ToolError>> + Send + 'a>>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("tool server `{0}` is not connected")]
    NotConnected(String),

    #[error("unknown tool `{0}`")]
    UnknownTool(String),

    #[error("invalid arguments for `{tool}`: {message}")]
    InvalidArguments { tool: String, message: String },

    #[error("tool transport failed: {0}")]
    Transport(String),

    #[error("initialize response carried no thread id: {0}")]
    MissingThreadId(String),
}

/// Invoke a named tool on a tool server.
///
/// Implementations must be cheap to share; callers hold them behind `Arc`.
pub trait ToolInvoker: Send + Sync {
    fn invoke<'a>(&'a self, server_id: &'a str, tool: &'a str, args: Value) -> ToolFuture<'a>;
}

/// Runs tools on the local machine.
///
/// Thread handles are minted on `Initialize` and must be presented on every
/// `BashCommand`, mirroring the remote agent's session semantics.
#[derive(Debug, Default)]
pub struct ProcessToolInvoker {
    threads: Mutex<HashSet<String>>,
}

impl ProcessToolInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every thread handle, as the remote agent does when it restarts.
    pub fn forget_threads(&self) {
        self.lock_threads().clear();
    }

    pub fn thread_count(&self) -> usize {
        self.lock_threads().len()
    }

    fn lock_threads(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.threads.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn initialize(&self, args: Value) -> Result<String, ToolError> {
        let args: InitializeArgs =
            serde_json::from_value(args).map_err(|error| ToolError::InvalidArguments {
                tool: TOOL_INITIALIZE.to_string(),
                message: error.to_string(),
            })?;
        let thread_id = format!("kz{}", Uuid::new_v4().simple());
        self.lock_threads().insert(thread_id.clone());
        debug!(workspace = %args.any_workspace_path, %thread_id, "initialized local thread");
        Ok(format!("Initialized workspace {}\nthread_id={thread_id}", args.any_workspace_path))
    }

    async fn bash(&self, args: Value) -> Result<String, ToolError> {
        let args: BashCommandArgs =
            serde_json::from_value(args).map_err(|error| ToolError::InvalidArguments {
                tool: TOOL_BASH_COMMAND.to_string(),
                message: error.to_string(),
            })?;

        if !self.lock_threads().contains(&args.thread_id) {
            return Ok(format!(
                "Error: No saved bash state found for thread_id {}. Please initialize first.",
                args.thread_id
            ));
        }

        let output = Command::new("bash")
            .arg("-c")
            .arg(&args.action_json.command)
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()
            .await
            .map_err(|error| ToolError::Transport(error.to_string()))?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&stderr);
        }
        Ok(text)
    }
}

impl ToolInvoker for ProcessToolInvoker {
    fn invoke<'a>(&'a self, _server_id: &'a str, tool: &'a str, args: Value) -> ToolFuture<'a> {
        Box::pin(async move {
            match tool {
                TOOL_INITIALIZE => self.initialize(args),
                TOOL_BASH_COMMAND => self.bash(args).await,
                other => Err(ToolError::UnknownTool(other.to_string())),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kibitz_common::protocol::tool::{is_stale_session, parse_thread_id};

    #[tokio::test]
    async fn initialize_then_run_command() {
        let invoker = ProcessToolInvoker::new();
        let init = invoker
            .invoke("local", TOOL_INITIALIZE, serde_json::to_value(InitializeArgs::first_call("/tmp")).unwrap())
            .await
            .expect("initialize should succeed");
        let thread_id = parse_thread_id(&init).expect("thread id should be present");

        let output = invoker
            .invoke(
                "local",
                TOOL_BASH_COMMAND,
                serde_json::to_value(BashCommandArgs::new("echo hello", thread_id)).unwrap(),
            )
            .await
            .expect("bash should succeed");
        assert_eq!(output.trim(), "hello");
    }

    #[tokio::test]
    async fn unknown_thread_reports_stale_session() {
        let invoker = ProcessToolInvoker::new();
        let output = invoker
            .invoke(
                "local",
                TOOL_BASH_COMMAND,
                serde_json::to_value(BashCommandArgs::new("echo hi", "nope")).unwrap(),
            )
            .await
            .unwrap();
        assert!(is_stale_session(&output));
    }

    #[tokio::test]
    async fn stderr_is_appended_after_stdout() {
        let invoker = ProcessToolInvoker::new();
        let init = invoker
            .invoke("local", TOOL_INITIALIZE, serde_json::to_value(InitializeArgs::first_call("/tmp")).unwrap())
            .await
            .unwrap();
        let thread_id = parse_thread_id(&init).unwrap();
        let output = invoker
            .invoke(
                "local",
                TOOL_BASH_COMMAND,
                serde_json::to_value(BashCommandArgs::new("echo out; echo err 1>&2", thread_id))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(output, "out\nerr\n");
        invoker.forget_threads();
        assert_eq!(invoker.thread_count(), 0);
    }

    #[tokio::test]
    async fn unknown_tool_is_rejected() {
        let invoker = ProcessToolInvoker::new();
        let error = invoker.invoke("local", "ReadFiles", Value::Null).await.unwrap_err();
        assert_eq!(error, ToolError::UnknownTool("ReadFiles".into()));
    }
}
