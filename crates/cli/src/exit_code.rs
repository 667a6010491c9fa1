// Consistent exit codes for the kibitz CLI.
//
//   0  = success
//   1  = general error
//   2  = usage/argument error (bad ref, bad conversation id)
//   10 = git command failed
//   11 = branch or predecessor not found
//   12 = tool transport unavailable

use std::fmt;
use std::process;

use kibitz_daemon::git::error::VcsError;
use kibitz_daemon::mirror::MirrorError;
use kibitz_daemon::tool::ToolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    Error = 1,
    Usage = 2,
    GitFailed = 10,
    NotFound = 11,
    Transport = 12,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Map an anyhow error to an exit code by inspecting the error chain.
    pub fn from_error(err: &anyhow::Error) -> Self {
        for cause in err.chain() {
            if let Some(Reported(code)) = cause.downcast_ref::<Reported>() {
                return *code;
            }
            if let Some(vcs) = cause.downcast_ref::<VcsError>() {
                return Self::from_vcs(vcs);
            }
            if let Some(MirrorError::Vcs(vcs)) = cause.downcast_ref::<MirrorError>() {
                return Self::from_vcs(vcs);
            }
            if cause.downcast_ref::<ToolError>().is_some() {
                return Self::Transport;
            }
        }
        Self::Error
    }

    pub fn from_vcs(error: &VcsError) -> Self {
        match error {
            VcsError::InvalidRef(_) | VcsError::BranchName(_) => Self::Usage,
            VcsError::BranchNotFound(_) | VcsError::MissingPredecessor { .. } => Self::NotFound,
            VcsError::CommandFailed { .. } => Self::GitFailed,
            VcsError::Tool(_) => Self::Transport,
        }
    }

    /// Stable string code used in JSON error output.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "OK",
            Self::Error => "ERROR",
            Self::Usage => "VALIDATION_FAILED",
            Self::GitFailed => "GIT_COMMAND_FAILED",
            Self::NotFound => "NOT_FOUND",
            Self::Transport => "TOOL_UNAVAILABLE",
        }
    }
}

/// A failure the command already printed as its output. Only the exit code
/// is left to deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reported(pub ExitCode);

impl fmt::Display for Reported {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "command failed ({})", self.0.as_str())
    }
}

impl std::error::Error for Reported {}

pub fn is_reported(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.downcast_ref::<Reported>().is_some())
}

impl From<ExitCode> for process::ExitCode {
    fn from(code: ExitCode) -> Self {
        process::ExitCode::from(code.code() as u8)
    }
}
