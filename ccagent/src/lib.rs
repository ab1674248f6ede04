//! Constitutional coding loop around an external coding agent.
//!
//! `ccagent` drives a command-line agent (`codex` or `claude`) through three
//! workflows: drafting a project charter ([`init`]), implementing backlog
//! stories one at a time under git checkpoints ([`looping`]), and judging a
//! diff against the charter ([`check`]). The crate keeps the same split
//! throughout:
//!
//! - **[`core`]**: Pure, deterministic logic (selection, extraction, draft
//!   normalization). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (filesystem, git, process execution).
//!   Hidden behind traits where the workflows need to fake them in tests.

pub mod check;
pub mod core;
pub mod exit_codes;
pub mod init;
pub mod io;
pub mod logging;
pub mod looping;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
