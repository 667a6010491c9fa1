// Projection of git state into `<project>/.kibitz/api/`.
//
// `rebuild` regenerates every document from `for-each-ref` and a fresh status
// read. Files are written to a temp name and renamed into place, so readers
// never see a partial document. Conversation files whose branches are gone
// are kept when current-version and removed when stale.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::Utc;
use kibitz_common::branch::DEFAULT_BRANCH;
use kibitz_common::mirror::{
    conversation_file_name, summarize_conversations, BranchesDocument, ConversationDocument,
    MirrorMetadata, ProjectDocument, RepositoryState, BRANCHES_FILE, PROJECT_FILE,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::git::error::VcsError;
use crate::git::repo_init::exclude_local_state;
use crate::git::vcs::ProjectVcs;

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error(transparent)]
    Vcs(#[from] VcsError),

    #[error("mirror I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("mirror JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct ApiMirror {
    dir: PathBuf,
}

impl ApiMirror {
    pub fn for_project(project_path: &Path) -> Self {
        Self { dir: project_path.join(".kibitz").join("api") }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Regenerate `project.json`, `branches.json` and one
    /// `conversation_<id>.json` per conversation.
    pub async fn rebuild(&self, vcs: &ProjectVcs, project_id: &str) -> Result<ProjectDocument, MirrorError> {
        exclude_local_state(vcs).await?;
        let branches = vcs.branch_listing().await?;
        let changes = vcs.fresh_changes().await?;
        let current_branch = vcs.current_branch().await;
        let head = vcs.head().await;

        let metadata = MirrorMetadata::new(project_id, vcs.project_path(), Utc::now());
        let conversations = summarize_conversations(&branches);

        std::fs::create_dir_all(&self.dir)?;

        for summary in &conversations {
            let mut steps: Vec<_> = branches
                .iter()
                .filter(|b| {
                    b.conversation.as_ref().is_some_and(|c| c.conversation_id == summary.conversation_id)
                })
                .cloned()
                .collect();
            steps.sort_by_key(|b| b.conversation.as_ref().map_or(0, |c| c.step));
            let document = ConversationDocument {
                metadata: metadata.clone(),
                conversation_id: summary.conversation_id.clone(),
                latest_step: summary.latest_step,
                steps,
            };
            self.write_json(&conversation_file_name(&summary.conversation_id), &document)?;
        }

        let live: Vec<String> =
            conversations.iter().map(|c| conversation_file_name(&c.conversation_id)).collect();
        self.prune_stale_conversations(&live)?;

        let branches_document = BranchesDocument { metadata: metadata.clone(), branches };
        self.write_json(BRANCHES_FILE, &branches_document)?;

        let project = ProjectDocument {
            metadata,
            repository: RepositoryState {
                current_branch,
                head,
                default_branch: DEFAULT_BRANCH.to_string(),
                total_branches: branches_document.branches.len(),
                is_dirty: !changes.is_empty(),
                uncommitted_files: changes.len(),
            },
            conversations,
        };
        self.write_json(PROJECT_FILE, &project)?;

        info!(
            project_id,
            branches = project.repository.total_branches,
            conversations = project.conversations.len(),
            "mirror rebuilt"
        );
        Ok(project)
    }

    /// `Ok(None)` when the document is missing or not current-version.
    pub fn load_project(&self) -> Result<Option<ProjectDocument>, MirrorError> {
        self.load_current(PROJECT_FILE)
    }

    pub fn load_branches(&self) -> Result<Option<BranchesDocument>, MirrorError> {
        self.load_current(BRANCHES_FILE)
    }

    pub fn load_conversation(&self, conversation_id: &str) -> Result<Option<ConversationDocument>, MirrorError> {
        self.load_current(&conversation_file_name(conversation_id))
    }

    fn load_current<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, MirrorError> {
        let raw = match std::fs::read_to_string(self.dir.join(name)) {
            Ok(raw) => raw,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(error.into()),
        };
        let value: Value = match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(_) => return Ok(None),
        };
        if !is_current_document(&value) {
            debug!(file = name, "stale mirror document");
            return Ok(None);
        }
        Ok(serde_json::from_value(value).ok())
    }

    fn prune_stale_conversations(&self, live: &[String]) -> Result<(), MirrorError> {
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with("conversation_") || !name.ends_with(".json") || live.contains(&name) {
                continue;
            }
            let current = std::fs::read_to_string(entry.path())
                .ok()
                .and_then(|raw| serde_json::from_str::<Value>(&raw).ok())
                .is_some_and(|value| is_current_document(&value));
            if !current {
                debug!(file = %name, "removing stale conversation document");
                std::fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }

    fn write_json<T: Serialize>(&self, name: &str, value: &T) -> Result<(), MirrorError> {
        let target = self.dir.join(name);
        let temp = self.dir.join(format!(".{name}.{}.tmp", Uuid::new_v4().simple()));
        let contents = serde_json::to_vec_pretty(value)?;
        std::fs::write(&temp, contents)?;
        if let Err(error) = std::fs::rename(&temp, &target) {
            let _ = std::fs::remove_file(&temp);
            return Err(error.into());
        }
        Ok(())
    }
}

fn is_current_document(value: &Value) -> bool {
    serde_json::from_value::<MirrorMetadata>(value["metadata"].clone())
        .is_ok_and(|metadata| metadata.is_current())
}
