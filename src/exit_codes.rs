//! Stable exit codes for dvx CLI commands.

/// Command succeeded, plan completed, or the run paused cleanly (step mode).
pub const OK: i32 = 0;
/// Orchestration blocked on a human, or the command failed validation.
pub const BLOCKED: i32 = 1;
