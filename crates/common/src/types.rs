// Records shared across Kibitz crates: working-tree changes, diff stats and
// commit metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a path changed relative to HEAD.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
    Renamed,
    Untracked,
}

impl ChangeKind {
    /// Single-letter marker used in prompts and human output.
    pub fn marker(self) -> char {
        match self {
            Self::Added => 'A',
            Self::Modified => 'M',
            Self::Deleted => 'D',
            Self::Renamed => 'R',
            Self::Untracked => '?',
        }
    }

    fn from_status_code(code: char) -> Option<Self> {
        match code {
            'A' | 'C' => Some(Self::Added),
            'M' | 'T' | 'U' => Some(Self::Modified),
            'D' => Some(Self::Deleted),
            'R' => Some(Self::Renamed),
            '?' => Some(Self::Untracked),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedFile {
    pub path: String,
    pub kind: ChangeKind,
}

impl ChangedFile {
    pub fn new(path: impl Into<String>, kind: ChangeKind) -> Self {
        Self { path: path.into(), kind }
    }
}

/// Parse `git status --porcelain` (v1) output.
///
/// Renames report the destination path. Ignored entries (`!!`) are skipped.
pub fn parse_porcelain(output: &str) -> Vec<ChangedFile> {
    output
        .lines()
        .filter_map(|line| {
            if line.len() < 4 {
                return None;
            }
            let mut codes = line.chars();
            let index = codes.next()?;
            let worktree = codes.next()?;
            if index == '!' {
                return None;
            }
            let path_part = line.get(3..)?;
            let path = match path_part.split_once(" -> ") {
                Some((_, destination)) => destination,
                None => path_part,
            };

            // Index status wins; fall back to the worktree column.
            let kind = ChangeKind::from_status_code(index)
                .or_else(|| ChangeKind::from_status_code(worktree))?;
            Some(ChangedFile::new(unquote_path(path.trim()), kind))
        })
        .collect()
}

/// Parse `git diff --name-status` output.
pub fn parse_name_status(output: &str) -> Vec<ChangedFile> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split('\t');
            let status = fields.next()?.trim();
            let first = fields.next()?;
            let path = fields.next().unwrap_or(first);
            let kind = ChangeKind::from_status_code(status.chars().next()?)?;
            Some(ChangedFile::new(unquote_path(path.trim()), kind))
        })
        .collect()
}

/// Git quotes paths with spaces or non-ASCII bytes.
fn unquote_path(path: &str) -> String {
    match path.strip_prefix('"').and_then(|p| p.strip_suffix('"')) {
        Some(inner) => inner.replace("\\\"", "\"").replace("\\\\", "\\"),
        None => path.to_string(),
    }
}

/// Line-level diff statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffStats {
    pub files_changed: usize,
    pub lines_added: usize,
    pub lines_removed: usize,
}

/// Parse `git diff --numstat` output. Binary files (`-\t-\tpath`) count as a
/// changed file with no line changes.
pub fn parse_numstat(output: &str) -> DiffStats {
    output.lines().filter(|line| !line.trim().is_empty()).fold(
        DiffStats::default(),
        |mut stats, line| {
            let mut fields = line.split('\t');
            let added = fields.next().and_then(|v| v.trim().parse::<usize>().ok()).unwrap_or(0);
            let removed = fields.next().and_then(|v| v.trim().parse::<usize>().ok()).unwrap_or(0);
            if fields.next().is_some() {
                stats.files_changed += 1;
                stats.lines_added += added;
                stats.lines_removed += removed;
            }
            stats
        },
    )
}

/// Metadata for one commit, assembled from several command outputs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitRecord {
    pub hash: String,
    pub parent_hash: Option<String>,
    pub author: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub subject: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub diff: String,
    #[serde(default)]
    pub files: Vec<String>,
    pub lines_added: usize,
    pub lines_removed: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommitRecord {
    pub fn short_hash(&self) -> &str {
        self.hash.get(..7).unwrap_or(&self.hash)
    }
}
