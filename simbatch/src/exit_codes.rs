//! Stable exit codes for simbatch CLI commands.

/// Every job executed (whatever its own exit status) and the merge completed.
pub const OK: i32 = 0;
/// Pre-flight failure: invalid config, missing simulator or traces, unresolved resume prefix.
pub const INVALID: i32 = 1;
/// Some jobs never executed (cancelled, worker lost, spawn failure). Finished jobs were merged.
pub const INCOMPLETE: i32 = 2;
/// The result store could not be read, locked or replaced. Its prior content is intact.
pub const STORE_FAILED: i32 = 3;
