//! Stable exit codes for ccagent CLI commands.

/// Command succeeded; `check` returned PASS.
pub const OK: i32 = 0;
/// Command failed, or `check` returned FAIL.
pub const FAIL: i32 = 1;
/// `build` ran out of iterations with stories still unfinished.
pub const INCOMPLETE: i32 = 2;
