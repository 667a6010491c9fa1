// kibitz-daemon library: version control orchestration for agent projects.

pub mod api;
pub mod config;
pub mod git;
pub mod mirror;
pub mod runtime;
pub mod tool;

#[cfg(test)]
mod testing;
