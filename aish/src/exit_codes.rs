//! Stable exit codes for the `ai` and `ask` binaries.

/// The task completed, the suggestion was shown, or the user declined a gated command.
pub const OK: i32 = 0;
/// Missing arguments, initialization failure, or a failed/malformed suggestion.
pub const INVALID: i32 = 1;
/// The session reached the configured `max_turns` without a final command.
pub const TURN_LIMIT: i32 = 2;
