// Session handles per (server, project path).
//
// Each key moves Uninitialized -> Initializing -> Ready(handle). The slot for
// a key is an async mutex, so concurrent callers on one key wait for a single
// `Initialize` call instead of racing their own. A `BashCommand` answered with
// a stale-session phrase invalidates the handle and is retried exactly once.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use kibitz_common::protocol::tool::{
    is_stale_session, parse_thread_id, BashCommandArgs, InitializeArgs, TOOL_BASH_COMMAND,
    TOOL_INITIALIZE,
};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::tool::{ToolError, ToolInvoker};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub server_id: String,
    pub project_path: String,
}

impl SessionKey {
    pub fn new(server_id: &str, project_path: &str) -> Self {
        Self { server_id: server_id.to_string(), project_path: project_path.to_string() }
    }
}

type Slot = Arc<AsyncMutex<Option<String>>>;

pub struct SessionManager {
    invoker: Arc<dyn ToolInvoker>,
    slots: Mutex<HashMap<SessionKey, Slot>>,
}

impl SessionManager {
    pub fn new(invoker: Arc<dyn ToolInvoker>) -> Self {
        Self { invoker, slots: Mutex::new(HashMap::new()) }
    }

    pub fn invoker(&self) -> &Arc<dyn ToolInvoker> {
        &self.invoker
    }

    /// Handle for a key, initializing it on first use.
    pub async fn handle(&self, server_id: &str, project_path: &str) -> Result<String, ToolError> {
        let slot = self.slot(&SessionKey::new(server_id, project_path));
        let mut guard = slot.lock().await;
        if let Some(handle) = guard.as_ref() {
            return Ok(handle.clone());
        }

        let args = serde_json::to_value(InitializeArgs::first_call(project_path)).map_err(|error| {
            ToolError::InvalidArguments { tool: TOOL_INITIALIZE.to_string(), message: error.to_string() }
        })?;
        let response = self.invoker.invoke(server_id, TOOL_INITIALIZE, args).await?;
        let handle = parse_thread_id(&response)
            .ok_or_else(|| ToolError::MissingThreadId(first_line(&response).to_string()))?;

        info!(server_id, project_path, thread_id = %handle, "session initialized");
        *guard = Some(handle.clone());
        Ok(handle)
    }

    /// Run a bash command under the key's handle, re-initializing and
    /// retrying once if the agent reports the handle as stale.
    pub async fn bash(
        &self,
        server_id: &str,
        project_path: &str,
        command: &str,
    ) -> Result<String, ToolError> {
        let handle = self.handle(server_id, project_path).await?;
        let response = self.send_bash(server_id, command, &handle).await?;
        if !is_stale_session(&response) {
            return Ok(response);
        }

        warn!(server_id, project_path, thread_id = %handle, "stale session, re-initializing");
        self.invalidate_if(server_id, project_path, &handle).await;
        let fresh = self.handle(server_id, project_path).await?;
        let retried = self.send_bash(server_id, command, &fresh).await?;
        if is_stale_session(&retried) {
            warn!(server_id, project_path, "session still stale after retry");
        }
        Ok(retried)
    }

    /// Forget the handle for a key.
    pub async fn invalidate(&self, server_id: &str, project_path: &str) {
        let slot = self.slot(&SessionKey::new(server_id, project_path));
        *slot.lock().await = None;
    }

    /// Drop all sessions.
    pub fn reset(&self) {
        self.lock_slots().clear();
    }

    /// Number of keys with a slot (initialized or not).
    pub fn len(&self) -> usize {
        self.lock_slots().len()
    }

    async fn invalidate_if(&self, server_id: &str, project_path: &str, stale: &str) {
        let slot = self.slot(&SessionKey::new(server_id, project_path));
        let mut guard = slot.lock().await;
        // Another caller may already have replaced it.
        if guard.as_deref() == Some(stale) {
            *guard = None;
        }
    }

    async fn send_bash(
        &self,
        server_id: &str,
        command: &str,
        handle: &str,
    ) -> Result<String, ToolError> {
        let args = serde_json::to_value(BashCommandArgs::new(command, handle)).map_err(|error| {
            ToolError::InvalidArguments {
                tool: TOOL_BASH_COMMAND.to_string(),
                message: error.to_string(),
            }
        })?;
        debug!(server_id, thread_id = handle, "dispatching bash command");
        self.invoker.invoke(server_id, TOOL_BASH_COMMAND, args).await
    }

    fn slot(&self, key: &SessionKey) -> Slot {
        Arc::clone(self.lock_slots().entry(key.clone()).or_default())
    }

    fn lock_slots(&self) -> std::sync::MutexGuard<'_, HashMap<SessionKey, Slot>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default()
}
