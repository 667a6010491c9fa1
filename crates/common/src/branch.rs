// Conversation branch naming: `conv-<conversation>-step-<n>`.
//
// Each conversation owns a linear chain of branches. Step 1 is cut from
// `main`; step N is cut from step N-1.

use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

/// Branch every conversation's first step is cut from.
pub const DEFAULT_BRANCH: &str = "main";

/// Prefix for branches created before a rollback.
pub const BACKUP_BRANCH_PREFIX: &str = "backup/rollback/";

const CONVERSATION_PREFIX: &str = "conv-";
const STEP_MARKER: &str = "-step-";

/// Maximum accepted conversation id length.
const MAX_CONVERSATION_ID_CHARS: usize = 128;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BranchNameError {
    #[error("conversation id is empty")]
    EmptyConversationId,

    #[error("conversation id exceeds {MAX_CONVERSATION_ID_CHARS} characters")]
    ConversationIdTooLong,

    #[error("conversation id contains invalid character {0:?}")]
    InvalidCharacter(char),

    #[error("step numbers start at 1")]
    ZeroStep,
}

/// A parsed `conv-<id>-step-<n>` branch name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConversationBranch {
    pub conversation_id: String,
    pub step: u32,
}

impl ConversationBranch {
    pub fn new(conversation_id: &str, step: u32) -> Result<Self, BranchNameError> {
        validate_conversation_id(conversation_id)?;
        if step == 0 {
            return Err(BranchNameError::ZeroStep);
        }
        Ok(Self { conversation_id: conversation_id.to_string(), step })
    }

    /// Full branch name.
    pub fn name(&self) -> String {
        branch_name(&self.conversation_id, self.step)
    }

    /// The branch this step must be created from, or `None` for step 1
    /// (which is cut from [`DEFAULT_BRANCH`]).
    pub fn predecessor(&self) -> Option<ConversationBranch> {
        if self.step <= 1 {
            return None;
        }
        Some(Self { conversation_id: self.conversation_id.clone(), step: self.step - 1 })
    }

    /// Name of the branch this step is based on.
    pub fn base_branch_name(&self) -> String {
        match self.predecessor() {
            Some(previous) => previous.name(),
            None => DEFAULT_BRANCH.to_string(),
        }
    }

    /// Parse a branch name. Accepts `refs/heads/`, `remotes/origin/` and
    /// `origin/` prefixes. Returns `None` for anything malformed.
    pub fn parse(name: &str) -> Option<Self> {
        let short = strip_ref_prefix(name.trim());
        let rest = short.strip_prefix(CONVERSATION_PREFIX)?;
        let marker = rest.rfind(STEP_MARKER)?;
        let conversation_id = &rest[..marker];
        let step_raw = &rest[marker + STEP_MARKER.len()..];

        if step_raw.is_empty() || !step_raw.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let step: u32 = step_raw.parse().ok()?;
        Self::new(conversation_id, step).ok()
    }
}

/// Format `conv-<id>-step-<n>` without validation.
pub fn branch_name(conversation_id: &str, step: u32) -> String {
    format!("{CONVERSATION_PREFIX}{conversation_id}{STEP_MARKER}{step}")
}

/// Glob matching every step branch of a conversation, for `for-each-ref`.
pub fn conversation_ref_pattern(conversation_id: &str) -> String {
    format!("refs/heads/{CONVERSATION_PREFIX}{conversation_id}{STEP_MARKER}*")
}

/// Conversation ids end up inside ref names and shell commands, so only
/// ASCII alphanumerics, `-` and `_` are allowed.
pub fn validate_conversation_id(conversation_id: &str) -> Result<(), BranchNameError> {
    if conversation_id.is_empty() {
        return Err(BranchNameError::EmptyConversationId);
    }
    if conversation_id.chars().count() > MAX_CONVERSATION_ID_CHARS {
        return Err(BranchNameError::ConversationIdTooLong);
    }
    if let Some(bad) =
        conversation_id.chars().find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
    {
        return Err(BranchNameError::InvalidCharacter(bad));
    }
    Ok(())
}

/// Next step number for a conversation given every known branch name.
///
/// Returns 1 when the conversation has no step branches yet, otherwise
/// `max(step) + 1`. Malformed names and other conversations are ignored.
pub fn next_step_number<S: AsRef<str>>(branches: &[S], conversation_id: &str) -> u32 {
    branches
        .iter()
        .filter_map(|name| ConversationBranch::parse(name.as_ref()))
        .filter(|branch| branch.conversation_id == conversation_id)
        .map(|branch| branch.step)
        .max()
        .map_or(1, |max| max.saturating_add(1))
}

/// `backup/rollback/<timestamp>` with characters git rejects in ref names
/// (`:`) and the fractional separator replaced by `-`.
pub fn backup_branch_name(now: DateTime<Utc>) -> String {
    let stamp = now.to_rfc3339_opts(SecondsFormat::Millis, true).replace([':', '.'], "-");
    format!("{BACKUP_BRANCH_PREFIX}{stamp}")
}

/// Strip `refs/heads/`, `remotes/<remote>/` or `origin/` from a ref name.
pub fn strip_ref_prefix(name: &str) -> &str {
    if let Some(rest) = name.strip_prefix("refs/heads/") {
        return rest;
    }
    if let Some(rest) = name.strip_prefix("remotes/") {
        return rest.split_once('/').map_or(rest, |(_, branch)| branch);
    }
    if let Some(rest) = name.strip_prefix("refs/remotes/") {
        return rest.split_once('/').map_or(rest, |(_, branch)| branch);
    }
    name.strip_prefix("origin/").unwrap_or(name)
}

/// Minimal ref-name validation for names coming from callers before they
/// reach a shell: no whitespace, no shell metacharacters, no `..`, no
/// leading `-`.
pub fn is_safe_ref_name(name: &str) -> bool {
    if name.is_empty() || name.starts_with('-') || name.starts_with('/') || name.ends_with('/') {
        return false;
    }
    if name.contains("..") || name.ends_with(".lock") || name.contains("@{") {
        return false;
    }
    name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '/' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn branch_name_format() {
        let branch = ConversationBranch::new("abc123", 4).unwrap();
        assert_eq!(branch.name(), "conv-abc123-step-4");
    }

    #[test]
    fn parse_accepts_ref_prefixes() {
        let expected = ConversationBranch { conversation_id: "abc".into(), step: 2 };
        assert_eq!(ConversationBranch::parse("conv-abc-step-2"), Some(expected.clone()));
        assert_eq!(ConversationBranch::parse("refs/heads/conv-abc-step-2"), Some(expected.clone()));
        assert_eq!(
            ConversationBranch::parse("remotes/origin/conv-abc-step-2"),
            Some(expected.clone())
        );
        assert_eq!(ConversationBranch::parse("  origin/conv-abc-step-2 "), Some(expected));
    }

    #[test]
    fn parse_handles_ids_containing_step_marker() {
        let parsed = ConversationBranch::parse("conv-a-step-b-step-3").unwrap();
        assert_eq!(parsed.conversation_id, "a-step-b");
        assert_eq!(parsed.step, 3);
    }

    #[test]
    fn parse_rejects_malformed_names() {
        assert_eq!(ConversationBranch::parse("main"), None);
        assert_eq!(ConversationBranch::parse("conv-abc-step-"), None);
        assert_eq!(ConversationBranch::parse("conv-abc-step-x1"), None);
        assert_eq!(ConversationBranch::parse("conv-abc-step-0"), None);
        assert_eq!(ConversationBranch::parse("conv--step-1"), None);
        assert_eq!(ConversationBranch::parse("conv-abc-step-+1"), None);
        assert_eq!(ConversationBranch::parse("conv-abc"), None);
        assert_eq!(ConversationBranch::parse("conv-a b-step-1"), None);
    }

    #[test]
    fn next_step_is_one_without_branches() {
        let branches: Vec<String> = vec!["main".into(), "feature/x".into()];
        assert_eq!(next_step_number(&branches, "abc"), 1);
        assert_eq!(next_step_number::<&str>(&[], "abc"), 1);
    }

    #[test]
    fn next_step_is_max_plus_one() {
        let branches = ["conv-abc-step-1", "conv-abc-step-3", "conv-abc-step-2", "main"];
        assert_eq!(next_step_number(&branches, "abc"), 4);
    }

    #[test]
    fn next_step_ignores_malformed_and_foreign_branches() {
        let branches = [
            "conv-abc-step-2",
            "conv-abc-step-oops",
            "conv-abcd-step-9",
            "conv-ab-step-7",
            "remotes/origin/conv-abc-step-5",
        ];
        assert_eq!(next_step_number(&branches, "abc"), 6);
    }

    #[test]
    fn predecessor_chain() {
        let step3 = ConversationBranch::new("c1", 3).unwrap();
        assert_eq!(step3.base_branch_name(), "conv-c1-step-2");
        let step1 = ConversationBranch::new("c1", 1).unwrap();
        assert!(step1.predecessor().is_none());
        assert_eq!(step1.base_branch_name(), DEFAULT_BRANCH);
    }

    #[test]
    fn conversation_id_validation() {
        assert_eq!(validate_conversation_id(""), Err(BranchNameError::EmptyConversationId));
        assert_eq!(validate_conversation_id("a;rm"), Err(BranchNameError::InvalidCharacter(';')));
        assert_eq!(
            validate_conversation_id(&"x".repeat(129)),
            Err(BranchNameError::ConversationIdTooLong)
        );
        assert!(validate_conversation_id("Conv_01-ab").is_ok());
        assert_eq!(ConversationBranch::new("abc", 0), Err(BranchNameError::ZeroStep));
    }

    #[test]
    fn backup_branch_name_is_ref_safe() {
        let now = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        let name = backup_branch_name(now);
        assert_eq!(name, "backup/rollback/2026-03-04T05-06-07-000Z");
        assert!(is_safe_ref_name(&name));
    }

    #[test]
    fn safe_ref_name_rules() {
        assert!(is_safe_ref_name("main"));
        assert!(is_safe_ref_name("feature/login-v2"));
        assert!(!is_safe_ref_name("-D"));
        assert!(!is_safe_ref_name("a..b"));
        assert!(!is_safe_ref_name("main; rm -rf /"));
        assert!(!is_safe_ref_name("x.lock"));
        assert!(!is_safe_ref_name(""));
    }

    #[test]
    fn ref_pattern_targets_local_heads() {
        assert_eq!(conversation_ref_pattern("abc"), "refs/heads/conv-abc-step-*");
    }

    mod properties {
        use super::super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn next_step_exceeds_every_existing_step(steps in proptest::collection::vec(1u32..10_000, 0..20)) {
                let names: Vec<String> = steps.iter().map(|s| branch_name("p", *s)).collect();
                let next = next_step_number(&names, "p");
                prop_assert!(steps.iter().all(|s| *s < next));
                prop_assert_eq!(next, steps.iter().max().map_or(1, |m| m + 1));
            }
        }
    }
}
