// Pushing committed branches.
//
// A push is requested through `PushTrigger`: either directly through git on
// the tool server or by POSTing to a push endpoint (the daemon's own
// `/api/projects/{id}/push` route).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use kibitz_common::branch::is_safe_ref_name;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use super::executor::GitExecutor;
use super::vcs::ProjectVcs;

const PUSH_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PushError {
    #[error("invalid ref `{0}`")]
    InvalidRef(String),

    #[error("push request failed: {0}")]
    Http(String),

    #[error("push endpoint returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("git push failed: {0}")]
    Git(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    pub project_id: String,
    pub project_path: String,
    pub branch_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushReceipt {
    pub pushed: bool,
    pub branch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub type PushFuture<'a> = Pin<Box<dyn Future<Output = Result<PushReceipt, PushError>> + Send + 'a>>;

pub trait PushTrigger: Send + Sync {
    fn push(&self, request: PushRequest) -> PushFuture<'_>;
}

/// `git push -u <remote> <branch>`. A project without the remote is not an
/// error; the receipt reports `pushed = false`.
pub async fn push_branch(vcs: &ProjectVcs, remote: &str, branch: &str) -> Result<PushReceipt, PushError> {
    for name in [remote, branch] {
        if !is_safe_ref_name(name) {
            return Err(PushError::InvalidRef(name.to_string()));
        }
    }

    let remotes = vcs.run("git remote").await;
    if !remotes.output.lines().any(|line| line.trim() == remote) {
        info!(project_path = vcs.project_path(), remote, "no remote configured, skipping push");
        return Ok(PushReceipt {
            pushed: false,
            branch: branch.to_string(),
            message: Some(format!("no remote `{remote}` configured")),
        });
    }

    let result = vcs.run(&format!("git push -u {remote} {branch}")).await;
    if !result.success {
        warn!(project_path = vcs.project_path(), remote, branch, error = %result.error_message(), "push failed");
        return Err(PushError::Git(result.error_message()));
    }
    info!(project_path = vcs.project_path(), remote, branch, "pushed");
    Ok(PushReceipt { pushed: true, branch: branch.to_string(), message: None })
}

/// Pushes through the tool server with git.
pub struct GitPushTrigger {
    executor: Arc<GitExecutor>,
    server_id: String,
    remote: String,
}

impl GitPushTrigger {
    pub fn new(executor: Arc<GitExecutor>, server_id: &str, remote: &str) -> Self {
        Self { executor, server_id: server_id.to_string(), remote: remote.to_string() }
    }
}

impl PushTrigger for GitPushTrigger {
    fn push(&self, request: PushRequest) -> PushFuture<'_> {
        Box::pin(async move {
            let vcs = ProjectVcs::new(Arc::clone(&self.executor), &self.server_id, &request.project_path);
            push_branch(&vcs, &self.remote, &request.branch_name).await
        })
    }
}

/// POSTs `{projectId, projectPath, branchName}` to
/// `<endpoint>/api/projects/<id>/push`.
#[derive(Debug, Clone)]
pub struct HttpPushTrigger {
    endpoint: String,
    http: reqwest::Client,
}

impl HttpPushTrigger {
    pub fn new(endpoint: &str) -> Result<Self, PushError> {
        let parsed = url::Url::parse(endpoint).map_err(|error| PushError::Http(format!("{endpoint}: {error}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(PushError::Http(format!("{endpoint}: unsupported scheme `{}`", parsed.scheme())));
        }
        let http = reqwest::Client::builder()
            .timeout(PUSH_TIMEOUT)
            .build()
            .map_err(|error| PushError::Http(error.to_string()))?;
        Ok(Self { endpoint: endpoint.trim_end_matches('/').to_string(), http })
    }

    pub fn url_for(&self, project_id: &str) -> String {
        format!("{}/api/projects/{project_id}/push", self.endpoint)
    }
}

impl PushTrigger for HttpPushTrigger {
    fn push(&self, request: PushRequest) -> PushFuture<'_> {
        Box::pin(async move {
            let response = self
                .http
                .post(self.url_for(&request.project_id))
                .json(&request)
                .send()
                .await
                .map_err(|error| PushError::Http(error.to_string()))?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(PushError::Status { status: status.as_u16(), body });
            }
            response.json::<PushReceipt>().await.map_err(|error| PushError::Http(error.to_string()))
        })
    }
}
