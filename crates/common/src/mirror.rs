// Projection documents mirrored into `<project>/.kibitz/api/`.
//
// These are a derived view of git state for the read API. Git is the source
// of truth; a document whose version is not `MIRROR_VERSION` is treated as
// stale and rebuilt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::branch::{strip_ref_prefix, ConversationBranch};

pub const MIRROR_VERSION: &str = "2.0";

pub const PROJECT_FILE: &str = "project.json";
pub const BRANCHES_FILE: &str = "branches.json";

/// `conversation_<id>.json`
pub fn conversation_file_name(conversation_id: &str) -> String {
    format!("conversation_{conversation_id}.json")
}

/// `for-each-ref` format producing one tab-separated line per branch:
/// name, hash, committer date, author, subject.
pub const BRANCH_LISTING_FORMAT: &str =
    "%(refname:short)%09%(objectname)%09%(committerdate:iso-strict)%09%(authorname)%09%(subject)";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MirrorMetadata {
    pub version: String,
    pub generated_at: DateTime<Utc>,
    pub project_id: String,
    pub project_path: String,
}

impl MirrorMetadata {
    pub fn new(project_id: &str, project_path: &str, generated_at: DateTime<Utc>) -> Self {
        Self {
            version: MIRROR_VERSION.to_string(),
            generated_at,
            project_id: project_id.to_string(),
            project_path: project_path.to_string(),
        }
    }

    pub fn is_current(&self) -> bool {
        self.version == MIRROR_VERSION
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRef {
    pub conversation_id: String,
    pub step: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchSummary {
    pub name: String,
    pub commit_hash: String,
    pub last_commit_message: String,
    pub author: String,
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation: Option<ConversationRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryState {
    pub current_branch: Option<String>,
    pub head: Option<String>,
    pub default_branch: String,
    pub total_branches: usize,
    pub is_dirty: bool,
    pub uncommitted_files: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub conversation_id: String,
    pub latest_step: u32,
    pub latest_branch: String,
    pub branch_count: usize,
}

/// `project.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDocument {
    pub metadata: MirrorMetadata,
    pub repository: RepositoryState,
    pub conversations: Vec<ConversationSummary>,
}

/// `branches.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchesDocument {
    pub metadata: MirrorMetadata,
    pub branches: Vec<BranchSummary>,
}

/// `conversation_<id>.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationDocument {
    pub metadata: MirrorMetadata,
    pub conversation_id: String,
    pub latest_step: u32,
    /// Step branches ordered by step number.
    pub steps: Vec<BranchSummary>,
}

/// Parse `for-each-ref --format=BRANCH_LISTING_FORMAT` output.
pub fn parse_branch_listing(output: &str) -> Vec<BranchSummary> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.splitn(5, '\t');
            let name = strip_ref_prefix(fields.next()?.trim()).to_string();
            let commit_hash = fields.next()?.trim().to_string();
            if name.is_empty() || commit_hash.is_empty() {
                return None;
            }
            let timestamp = fields
                .next()
                .and_then(|raw| DateTime::parse_from_rfc3339(raw.trim()).ok())
                .map(|dt| dt.with_timezone(&Utc));
            let author = fields.next().unwrap_or_default().trim().to_string();
            let last_commit_message = fields.next().unwrap_or_default().trim().to_string();
            let conversation = ConversationBranch::parse(&name)
                .map(|b| ConversationRef { conversation_id: b.conversation_id, step: b.step });
            Some(BranchSummary {
                name,
                commit_hash,
                last_commit_message,
                author,
                timestamp,
                conversation,
            })
        })
        .collect()
}

/// Group conversation branches into per-conversation summaries, ordered by id.
pub fn summarize_conversations(branches: &[BranchSummary]) -> Vec<ConversationSummary> {
    let mut grouped: std::collections::BTreeMap<&str, (u32, usize)> =
        std::collections::BTreeMap::new();
    for conversation in branches.iter().filter_map(|b| b.conversation.as_ref()) {
        let entry = grouped.entry(conversation.conversation_id.as_str()).or_insert((0, 0));
        entry.0 = entry.0.max(conversation.step);
        entry.1 += 1;
    }
    grouped
        .into_iter()
        .map(|(id, (latest_step, branch_count))| ConversationSummary {
            conversation_id: id.to_string(),
            latest_step,
            latest_branch: crate::branch::branch_name(id, latest_step),
            branch_count,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "main\taaa111\t2026-01-02T03:04:05+00:00\tAda\tinitial commit\n\
conv-c1-step-1\tbbb222\t2026-01-02T04:00:00+01:00\tKibitz\tfeat: add parser\n\
conv-c1-step-2\tccc333\tnot-a-date\tKibitz\tfix: tabs\tin subject\n\
conv-c2-step-1\tddd444\t2026-01-03T00:00:00Z\tKibitz\tchore: init\n";

    #[test]
    fn branch_listing_parses_fields_and_conversations() {
        let branches = parse_branch_listing(LISTING);
        assert_eq!(branches.len(), 4);

        assert_eq!(branches[0].name, "main");
        assert_eq!(branches[0].author, "Ada");
        assert!(branches[0].conversation.is_none());
        assert!(branches[0].timestamp.is_some());

        let step1 = &branches[1];
        assert_eq!(
            step1.conversation,
            Some(ConversationRef { conversation_id: "c1".into(), step: 1 })
        );
        assert_eq!(step1.timestamp.unwrap().to_rfc3339(), "2026-01-02T03:00:00+00:00");

        assert!(branches[2].timestamp.is_none());
        assert_eq!(branches[2].last_commit_message, "fix: tabs\tin subject");
    }

    #[test]
    fn conversations_are_grouped_by_id() {
        let summaries = summarize_conversations(&parse_branch_listing(LISTING));
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].conversation_id, "c1");
        assert_eq!(summaries[0].latest_step, 2);
        assert_eq!(summaries[0].latest_branch, "conv-c1-step-2");
        assert_eq!(summaries[0].branch_count, 2);
        assert_eq!(summaries[1].conversation_id, "c2");
    }

    #[test]
    fn metadata_version_check() {
        let mut metadata = MirrorMetadata::new("p1", "/work/p1", Utc::now());
        assert!(metadata.is_current());
        metadata.version = "1.0".into();
        assert!(!metadata.is_current());
    }

    #[test]
    fn documents_use_camel_case_keys() {
        let doc = BranchesDocument {
            metadata: MirrorMetadata::new("p1", "/work/p1", Utc::now()),
            branches: parse_branch_listing(LISTING),
        };
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["metadata"]["version"], "2.0");
        assert_eq!(value["metadata"]["projectId"], "p1");
        assert_eq!(value["branches"][1]["commitHash"], "bbb222");
        assert_eq!(value["branches"][1]["conversation"]["conversationId"], "c1");
        assert_eq!(conversation_file_name("c1"), "conversation_c1.json");
    }
}
