//! Process exit codes for schedulers and CI wrappers.

/// The run succeeded, or the command completed.
pub const SUCCESS: i32 = 0;
/// The process could not start its runtime or a run could not execute.
pub const RUNTIME_ERROR: i32 = 1;
/// Configuration or catalog could not be loaded.
pub const CONFIG_ERROR: i32 = 2;
/// The run failed or aborted.
pub const RUN_FAILED: i32 = 3;
/// The run finished with some stages failed.
pub const RUN_PARTIAL: i32 = 4;
