//! Stable exit codes for relay CLI commands.

/// Command succeeded (including "workflow already complete").
pub const OK: i32 = 0;
/// Command failed: invalid files, unknown stage or verdict, backend failure.
pub const INVALID: i32 = 1;
/// `relay run` stopped because the current stage reached an iteration limit.
pub const LIMIT_REACHED: i32 = 2;
