//! Stable exit codes for the CLI.

/// Run completed with nothing blocked.
pub const OK: i32 = 0;
/// Setup failure, fatal run error, or failure with continue-on-failure off.
pub const ERROR: i32 = 1;
/// Run finished but some tasks exhausted their retries.
pub const PARTIAL: i32 = 2;
