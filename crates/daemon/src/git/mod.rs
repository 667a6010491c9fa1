// Version control orchestration over the tool transport: sessions, command
// execution, cached reads, commits, conversation branches and auto-commit.

pub mod classify;
pub mod commit;
pub mod conversation;
pub mod error;
pub mod executor;
pub mod llm;
pub mod push;
pub mod repo_init;
pub mod session;
pub mod state_cache;
pub mod triggers;
pub mod vcs;
