// Success/failure classification of command output.
//
// The tool transport returns stdout and stderr merged into one string with no
// exit code, so failure is inferred from markers git, bash and credential
// helpers print. Keep every marker covered by the fixture table below.
//
// Output that echoes user-authored text (commit subjects, author names,
// paths) is classified with `OutputKind::Formatted` or `OutputKind::Commit`
// so that text cannot be mistaken for a diagnostic.

/// Markers that mean failure when a line starts with them (case-insensitive).
const LINE_PREFIX_MARKERS: &[&str] = &["fatal:", "error:"];

/// Markers that mean failure anywhere in diagnostic output.
const ANYWHERE_MARKERS: &[&str] = &[
    "No such file or directory",
    "src refspec",
    "failed to push",
    "unbound variable",
    "Username for 'https://",
    "Password for 'https://",
    "could not read Username",
    "Authentication failed",
    "Permission denied (publickey)",
    "command not found",
];

/// Line prefixes of messages printed by the shell itself.
const SHELL_PREFIXES: &[&str] = &["bash:", "sh:", "zsh:", "/bin/sh:", "/bin/bash:"];

/// How much of the output is free text that must not be scanned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputKind {
    /// Plain git or shell chatter: every marker applies.
    #[default]
    Diagnostic,
    /// Records from `--format`, `--porcelain` or name listings. Only
    /// line-start markers and shell messages apply.
    Formatted,
    /// `git commit`: a `[<branch> <hash>] <subject>` summary line means the
    /// commit landed, whatever else the output (hooks, subject) says.
    Commit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub success: bool,
    /// First offending line, trimmed.
    pub error: Option<String>,
}

impl Classification {
    fn ok() -> Self {
        Self { success: true, error: None }
    }

    fn failed(line: &str) -> Self {
        Self { success: false, error: Some(line.trim().to_string()) }
    }
}

pub fn classify(output: &str) -> Classification {
    classify_as(output, OutputKind::Diagnostic)
}

pub fn classify_as(output: &str, kind: OutputKind) -> Classification {
    if kind == OutputKind::Commit && commit_summary(output).is_some() {
        return Classification::ok();
    }
    for line in output.lines() {
        let trimmed = line.trim_start();
        let lowered = trimmed.to_ascii_lowercase();
        if LINE_PREFIX_MARKERS.iter().any(|marker| lowered.starts_with(marker)) {
            return Classification::failed(line);
        }
        let scan = match kind {
            OutputKind::Formatted => SHELL_PREFIXES.iter().any(|prefix| lowered.starts_with(prefix)),
            OutputKind::Diagnostic | OutputKind::Commit => true,
        };
        if scan && ANYWHERE_MARKERS.iter().any(|marker| line.contains(marker)) {
            return Classification::failed(line);
        }
    }
    Classification::ok()
}

/// Branch and abbreviated hash from the summary line `git commit` prints:
/// `[main 1a2b3c4] subject` or `[main (root-commit) 1a2b3c4] subject`.
pub fn commit_summary(output: &str) -> Option<(&str, &str)> {
    output.lines().find_map(|line| {
        let rest = line.trim_start().strip_prefix('[')?;
        let (inside, _) = rest.split_once(']')?;
        let mut words = inside.split_whitespace();
        let branch = words.next()?;
        let hash = words.last()?;
        let is_hash = hash.len() >= 4 && hash.chars().all(|c| c.is_ascii_hexdigit());
        is_hash.then_some((branch, hash))
    })
}
