//! Stable exit codes for rlm CLI commands.

/// The session produced an answer, or the command succeeded.
pub const OK: i32 = 0;
/// Invalid arguments, config or context, or any other setup error.
pub const INVALID: i32 = 1;
/// The session ran out of iterations or time without an answer.
pub const EXHAUSTED: i32 = 2;
/// The session stopped after repeated empty or failed model responses.
pub const FATAL: i32 = 3;
