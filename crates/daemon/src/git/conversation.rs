// Conversation step branches.
//
// Step N of a conversation is always cut from step N-1. If the predecessor
// cannot be checked out the new step is refused rather than silently based
// on `main`.

use kibitz_common::branch::{
    conversation_ref_pattern, next_step_number, validate_conversation_id, ConversationBranch,
};
use serde::Serialize;
use tracing::{info, warn};

use super::error::VcsError;
use super::vcs::ProjectVcs;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationBranchOutcome {
    pub branch: String,
    pub step: u32,
    pub base_branch: String,
    pub commit_hash: Option<String>,
}

/// Step number the next branch of `conversation_id` will get.
pub async fn next_interaction_count(vcs: &ProjectVcs, conversation_id: &str) -> Result<u32, VcsError> {
    validate_conversation_id(conversation_id)?;
    let names = vcs.ref_names(&conversation_ref_pattern(conversation_id)).await?;
    Ok(next_step_number(&names, conversation_id))
}

/// Create and check out the next step branch for a conversation.
pub async fn create_conversation_branch(
    vcs: &ProjectVcs,
    conversation_id: &str,
) -> Result<ConversationBranchOutcome, VcsError> {
    let step = next_interaction_count(vcs, conversation_id).await?;
    let branch = ConversationBranch::new(conversation_id, step)?;
    let name = branch.name();

    let base_branch = match branch.predecessor() {
        Some(previous) => {
            let previous_name = previous.name();
            if let Err(error) = vcs.checkout(&previous_name).await {
                warn!(branch = %name, base = %previous_name, %error, "predecessor checkout failed");
                return Err(VcsError::MissingPredecessor { branch: previous_name, step });
            }
            previous_name
        }
        None => {
            let base = branch.base_branch_name();
            match vcs.checkout(&base).await {
                Ok(()) => base,
                Err(error) => {
                    let current = vcs.current_branch().await.unwrap_or_else(|| "HEAD".to_string());
                    warn!(branch = %name, base = %base, current = %current, %error, "default branch checkout failed, using current HEAD");
                    current
                }
            }
        }
    };

    vcs.create_branch_and_checkout(&name).await?;
    let commit_hash = vcs.head().await;
    info!(project_path = vcs.project_path(), branch = %name, step, base = %base_branch, "conversation branch created");

    Ok(ConversationBranchOutcome { branch: name, step, base_branch, commit_hash })
}
