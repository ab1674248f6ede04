//! I/O adapters for ccagent commands.

pub mod agent;
pub mod backlog;
pub mod config;
pub mod constitution;
pub mod files;
pub mod git;
pub mod layout;
pub mod process;
pub mod progress;
pub mod prompt;
