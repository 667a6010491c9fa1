use kibitz_common::branch::BranchNameError;
use thiserror::Error;

use crate::tool::ToolError;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VcsError {
    #[error("invalid ref `{0}`")]
    InvalidRef(String),

    #[error("branch `{0}` does not exist")]
    BranchNotFound(String),

    #[error("predecessor branch `{branch}` for step {step} could not be checked out")]
    MissingPredecessor { branch: String, step: u32 },

    #[error("`{command}` failed: {message}")]
    CommandFailed { command: String, message: String },

    #[error(transparent)]
    BranchName(#[from] BranchNameError),

    #[error(transparent)]
    Tool(#[from] ToolError),
}

impl VcsError {
    pub fn command_failed(command: &str, message: impl Into<String>) -> Self {
        Self::CommandFailed { command: command.to_string(), message: message.into() }
    }
}
