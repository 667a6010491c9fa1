// Wire-level contracts shared by the daemon and CLI.

pub mod tool;
