//! Stable exit codes for pairloop CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid config, arguments, or any other failure.
pub const INVALID: i32 = 1;
/// `pairloop extract` found no fenced code block in its input.
pub const NO_CODE: i32 = 2;
