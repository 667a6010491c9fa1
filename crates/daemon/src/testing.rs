// Scripted tool invoker for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use kibitz_common::protocol::tool::{TOOL_BASH_COMMAND, TOOL_INITIALIZE};
use serde_json::Value;

use crate::git::executor::GitExecutor;
use crate::git::session::SessionManager;
use crate::git::state_cache::GitStateCache;
use crate::tool::{ToolError, ToolFuture, ToolInvoker};

const STALE_RESPONSE: &str = "Error: No saved bash state found for thread_id. Initialize first.";

/// Answers `BashCommand` calls by substring match on the command.
///
/// One-shot rules are consumed in registration order before persistent
/// rules; among persistent rules the most recently registered wins.
/// Unmatched commands answer with an empty string.
#[derive(Default)]
pub struct ScriptedInvoker {
    init_calls: AtomicUsize,
    bash_calls: AtomicUsize,
    init_delay: Option<Duration>,
    init_response: Option<String>,
    stale_remaining: AtomicUsize,
    once: Mutex<VecDeque<(String, String)>>,
    rules: Mutex<Vec<(String, String)>>,
    commands: Mutex<Vec<String>>,
}

impl ScriptedInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_init_delay(mut self, delay: Duration) -> Self {
        self.init_delay = Some(delay);
        self
    }

    pub fn with_init_response(mut self, response: &str) -> Self {
        self.init_response = Some(response.to_string());
        self
    }

    /// Answer the next `count` bash calls with a stale-session error.
    pub fn push_stale(&self, count: usize) {
        self.stale_remaining.fetch_add(count, Ordering::SeqCst);
    }

    pub fn on(&self, pattern: &str, response: &str) {
        self.rules.lock().unwrap().push((pattern.to_string(), response.to_string()));
    }

    pub fn once(&self, pattern: &str, response: &str) {
        self.once.lock().unwrap().push_back((pattern.to_string(), response.to_string()));
    }

    pub fn init_calls(&self) -> usize {
        self.init_calls.load(Ordering::SeqCst)
    }

    pub fn bash_calls(&self) -> usize {
        self.bash_calls.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn count(&self, pattern: &str) -> usize {
        self.commands().iter().filter(|c| c.contains(pattern)).count()
    }

    pub fn ran(&self, pattern: &str) -> bool {
        self.count(pattern) > 0
    }

    fn respond(&self, command: &str) -> String {
        self.commands.lock().unwrap().push(command.to_string());

        let stale = self
            .stale_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if stale {
            return STALE_RESPONSE.to_string();
        }

        {
            let mut once = self.once.lock().unwrap();
            if let Some(index) = once.iter().position(|(pattern, _)| command.contains(pattern)) {
                if let Some((_, response)) = once.remove(index) {
                    return response;
                }
            }
        }

        self.rules
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(pattern, _)| command.contains(pattern))
            .map(|(_, response)| response.clone())
            .unwrap_or_default()
    }
}

impl ToolInvoker for ScriptedInvoker {
    fn invoke<'a>(&'a self, _server_id: &'a str, tool: &'a str, args: Value) -> ToolFuture<'a> {
        Box::pin(async move {
            match tool {
                TOOL_INITIALIZE => {
                    let n = self.init_calls.fetch_add(1, Ordering::SeqCst) + 1;
                    if let Some(delay) = self.init_delay {
                        tokio::time::sleep(delay).await;
                    }
                    Ok(self.init_response.clone().unwrap_or_else(|| format!("thread_id=t{n}")))
                }
                TOOL_BASH_COMMAND => {
                    self.bash_calls.fetch_add(1, Ordering::SeqCst);
                    let command = args["action_json"]["command"].as_str().unwrap_or_default();
                    Ok(self.respond(command))
                }
                other => Err(ToolError::UnknownTool(other.to_string())),
            }
        })
    }
}

/// Executor over a scripted invoker with a zero TTL cache.
pub fn scripted_executor() -> (Arc<ScriptedInvoker>, Arc<GitExecutor>) {
    let invoker = Arc::new(ScriptedInvoker::new());
    let sessions = Arc::new(SessionManager::new(invoker.clone()));
    let executor = Arc::new(GitExecutor::new(sessions, GitStateCache::new(Duration::ZERO)));
    (invoker, executor)
}
