// HTTP read API over the side-channel mirror, plus the push endpoint.

use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use kibitz_common::branch::{is_safe_ref_name, validate_conversation_id};
use kibitz_common::mirror::{BranchesDocument, ConversationDocument, ProjectDocument};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::config::ProjectConfig;
use crate::git::error::VcsError;
use crate::git::executor::{project_id_for, GitExecutor};
use crate::git::push::{push_branch, PushError, PushReceipt};
use crate::git::vcs::ProjectVcs;
use crate::mirror::{ApiMirror, MirrorError};

// ── Errors ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    NotFound,
    ValidationFailed,
    GitCommandFailed,
    InternalError,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::GitCommandFailed => "GIT_COMMAND_FAILED",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    pub const fn status(self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::ValidationFailed => StatusCode::BAD_REQUEST,
            Self::GitCommandFailed => StatusCode::BAD_GATEWAY,
            Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub const fn retryable(self) -> bool {
        matches!(self, Self::GitCommandFailed | Self::InternalError)
    }
}

#[derive(Debug, Clone)]
pub struct ApiError {
    code: ErrorCode,
    message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationFailed, message)
    }
}

impl From<VcsError> for ApiError {
    fn from(error: VcsError) -> Self {
        let code = match &error {
            VcsError::InvalidRef(_) | VcsError::BranchName(_) => ErrorCode::ValidationFailed,
            VcsError::BranchNotFound(_) | VcsError::MissingPredecessor { .. } => ErrorCode::NotFound,
            VcsError::CommandFailed { .. } | VcsError::Tool(_) => ErrorCode::GitCommandFailed,
        };
        Self::new(code, error.to_string())
    }
}

impl From<MirrorError> for ApiError {
    fn from(error: MirrorError) -> Self {
        match error {
            MirrorError::Vcs(vcs) => vcs.into(),
            other => Self::new(ErrorCode::InternalError, other.to_string()),
        }
    }
}

impl From<PushError> for ApiError {
    fn from(error: PushError) -> Self {
        let code = match &error {
            PushError::InvalidRef(_) => ErrorCode::ValidationFailed,
            PushError::Git(_) => ErrorCode::GitCommandFailed,
            PushError::Http(_) | PushError::Status { .. } => ErrorCode::InternalError,
        };
        Self::new(code, error.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.code.status(),
            Json(json!({
                "error": {
                    "code": self.code.as_str(),
                    "message": self.message,
                    "retryable": self.code.retryable(),
                }
            })),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ── Project lookup ─────────────────────────────────────────────────

/// Maps project ids to directories under the projects base dir. A project
/// lives at `<base>/<id>` or `<base>/<id>_<slug>`.
#[derive(Debug, Clone)]
pub struct ProjectLocator {
    base: PathBuf,
}

impl ProjectLocator {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &FsPath {
        &self.base
    }

    pub fn resolve(&self, project_id: &str) -> ApiResult<PathBuf> {
        if project_id.is_empty()
            || !project_id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ApiError::validation(format!("invalid project id `{project_id}`")));
        }

        let exact = self.base.join(project_id);
        if exact.is_dir() {
            return Ok(exact);
        }

        // `<id>_<slug>` first, then directories whose derived id matches.
        let prefix = format!("{project_id}_");
        let entries = std::fs::read_dir(&self.base)
            .map_err(|_| ApiError::not_found(format!("project `{project_id}` not found")))?;
        let mut dirs: Vec<PathBuf> =
            entries.filter_map(Result::ok).map(|entry| entry.path()).filter(|path| path.is_dir()).collect();
        dirs.sort();

        let prefixed = dirs.iter().find(|path| {
            path.file_name().is_some_and(|name| name.to_string_lossy().starts_with(&prefix))
        });
        prefixed
            .or_else(|| dirs.iter().find(|path| project_id_for(&path.to_string_lossy()) == project_id))
            .cloned()
            .ok_or_else(|| ApiError::not_found(format!("project `{project_id}` not found")))
    }
}

// ── Router ─────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct ApiState {
    executor: Arc<GitExecutor>,
    locator: ProjectLocator,
    server_id: String,
}

impl ApiState {
    pub fn new(executor: Arc<GitExecutor>, locator: ProjectLocator, server_id: &str) -> Self {
        Self { executor, locator, server_id: server_id.to_string() }
    }

    fn project(&self, project_id: &str) -> ApiResult<(ProjectVcs, ApiMirror)> {
        let root = self.locator.resolve(project_id)?;
        Ok((self.vcs_at(&root), ApiMirror::for_project(&root)))
    }

    fn vcs_at(&self, root: &FsPath) -> ProjectVcs {
        ProjectVcs::new(Arc::clone(&self.executor), &self.server_id, &root.to_string_lossy())
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/projects/{id}", get(get_project))
        .route("/api/projects/{id}/branches", get(get_branches))
        .route("/api/projects/{id}/conversations/{conversation_id}", get(get_conversation))
        .route("/api/projects/{id}/push", post(push_project))
        .route("/api/projects/{id}/mirror/rebuild", post(rebuild_mirror))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

async fn get_project(State(state): State<ApiState>, Path(id): Path<String>) -> ApiResult<Json<ProjectDocument>> {
    let (vcs, mirror) = state.project(&id)?;
    if let Some(document) = mirror.load_project()? {
        return Ok(Json(document));
    }
    Ok(Json(mirror.rebuild(&vcs, &id).await?))
}

async fn get_branches(State(state): State<ApiState>, Path(id): Path<String>) -> ApiResult<Json<BranchesDocument>> {
    let (vcs, mirror) = state.project(&id)?;
    if let Some(document) = mirror.load_branches()? {
        return Ok(Json(document));
    }
    mirror.rebuild(&vcs, &id).await?;
    mirror
        .load_branches()?
        .map(Json)
        .ok_or_else(|| ApiError::new(ErrorCode::InternalError, "branches document missing after rebuild"))
}

async fn get_conversation(
    State(state): State<ApiState>,
    Path((id, conversation_id)): Path<(String, String)>,
) -> ApiResult<Json<ConversationDocument>> {
    validate_conversation_id(&conversation_id).map_err(|error| ApiError::validation(error.to_string()))?;
    let (vcs, mirror) = state.project(&id)?;
    if let Some(document) = mirror.load_conversation(&conversation_id)? {
        return Ok(Json(document));
    }
    mirror.rebuild(&vcs, &id).await?;
    mirror
        .load_conversation(&conversation_id)?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("conversation `{conversation_id}` not found")))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PushBody {
    #[serde(default)]
    branch_name: Option<String>,
}

async fn push_project(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<PushReceipt>> {
    let body: PushBody = if body.iter().all(u8::is_ascii_whitespace) {
        PushBody::default()
    } else {
        serde_json::from_slice(&body).map_err(|error| ApiError::validation(format!("invalid push body: {error}")))?
    };

    let root = state.locator.resolve(&id)?;
    let vcs = state.vcs_at(&root);
    let remote = ProjectConfig::load(&root).git.remote;
    let branch = match body.branch_name.filter(|b| !b.trim().is_empty()) {
        Some(branch) => branch,
        None => vcs
            .current_branch()
            .await
            .ok_or_else(|| ApiError::validation("no branch given and HEAD is detached"))?,
    };
    if !is_safe_ref_name(&branch) {
        return Err(ApiError::validation(format!("invalid branch `{branch}`")));
    }

    match push_branch(&vcs, &remote, &branch).await {
        Ok(receipt) => {
            info!(project_id = %id, %remote, %branch, pushed = receipt.pushed, "push request handled");
            Ok(Json(receipt))
        }
        Err(error) => {
            warn!(project_id = %id, %branch, %error, "push request failed");
            Err(error.into())
        }
    }
}

async fn rebuild_mirror(State(state): State<ApiState>, Path(id): Path<String>) -> ApiResult<Json<ProjectDocument>> {
    let (vcs, mirror) = state.project(&id)?;
    Ok(Json(mirror.rebuild(&vcs, &id).await?))
}
