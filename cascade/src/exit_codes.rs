//! Stable exit codes for `cascade` CLI commands.

/// Command succeeded; for `run`, every phase completed or was skipped.
pub const OK: i32 = 0;
/// Invalid input, rejected operation, or an internal error.
pub const INVALID: i32 = 1;
/// `cascade run` stopped on a phase that needs a skip or manual retry.
pub const FAILED: i32 = 2;
/// `cascade run` stopped because the workflow was paused.
pub const PAUSED: i32 = 3;
